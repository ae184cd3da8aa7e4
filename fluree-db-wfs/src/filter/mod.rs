//! Filter predicates for feature queries.
//!
//! A [`Filter`] is used three ways:
//! - split into a server-side part and a local residual ([`split`])
//! - encoded into the service's predicate language ([`encode`])
//! - re-evaluated against decoded features ([`evaluate`])
//!
//! # Design
//!
//! - Properties are referenced by attribute name, the only identifier the
//!   wire protocol knows
//! - Expressions are immutable trees combined via [`Filter::and`],
//!   [`Filter::or`] and [`Filter::negate`], which simplify as they build

pub mod encode;
pub mod evaluate;
pub mod split;

pub use encode::{FilterEncoder, OgcFilterEncoder};
pub use split::{split_filter, FilterSplit};

use crate::crs::{Crs, Envelope};
use std::collections::BTreeSet;
use std::fmt;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOp {
    /// Filter Encoding element name.
    pub fn element_name(&self) -> &'static str {
        match self {
            Self::Eq => "PropertyIsEqualTo",
            Self::NotEq => "PropertyIsNotEqualTo",
            Self::Lt => "PropertyIsLessThan",
            Self::LtEq => "PropertyIsLessThanOrEqualTo",
            Self::Gt => "PropertyIsGreaterThan",
            Self::GtEq => "PropertyIsGreaterThanOrEqualTo",
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
        }
    }
}

/// Literal operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Filter predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Everything passes
    Include,
    /// Nothing passes
    Exclude,
    /// Feature identifier set
    Id(BTreeSet<String>),
    /// Geometry envelope intersects the box
    BBox {
        property: String,
        envelope: Envelope,
        crs: Option<Crs>,
    },
    Comparison {
        property: String,
        op: ComparisonOp,
        value: Literal,
    },
    /// SQL-LIKE style pattern match
    Like {
        property: String,
        pattern: String,
        wildcard: char,
        single_char: char,
        escape: char,
    },
    IsNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Id(ids.into_iter().map(Into::into).collect())
    }

    pub fn bbox(property: impl Into<String>, envelope: Envelope, crs: Option<Crs>) -> Self {
        Self::BBox {
            property: property.into(),
            envelope,
            crs,
        }
    }

    pub fn compare(
        property: impl Into<String>,
        op: ComparisonOp,
        value: impl Into<Literal>,
    ) -> Self {
        Self::Comparison {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(property, ComparisonOp::Eq, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(property, ComparisonOp::Gt, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(property, ComparisonOp::Lt, value)
    }

    /// `%`/`_`/`\` pattern.
    pub fn like(property: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            property: property.into(),
            pattern: pattern.into(),
            wildcard: '%',
            single_char: '_',
            escape: '\\',
        }
    }

    pub fn is_null(property: impl Into<String>) -> Self {
        Self::IsNull(property.into())
    }

    /// Logical AND, flattening nested ANDs. `Include` is the identity and
    /// `Exclude` absorbs.
    pub fn and(filters: Vec<Filter>) -> Self {
        let mut flattened = Vec::new();
        for filter in filters {
            match filter {
                Filter::Include => continue,
                Filter::Exclude => return Filter::Exclude,
                Filter::And(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }

        match flattened.len() {
            0 => Filter::Include,
            1 => flattened.pop().unwrap_or(Filter::Include),
            _ => Filter::And(flattened),
        }
    }

    /// Logical OR, flattening nested ORs. `Exclude` is the identity and
    /// `Include` absorbs.
    pub fn or(filters: Vec<Filter>) -> Self {
        let mut flattened = Vec::new();
        for filter in filters {
            match filter {
                Filter::Exclude => continue,
                Filter::Include => return Filter::Include,
                Filter::Or(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }

        match flattened.len() {
            0 => Filter::Exclude,
            1 => flattened.pop().unwrap_or(Filter::Exclude),
            _ => Filter::Or(flattened),
        }
    }

    pub fn negate(filter: Filter) -> Self {
        match filter {
            Filter::Include => Filter::Exclude,
            Filter::Exclude => Filter::Include,
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    pub fn is_include(&self) -> bool {
        matches!(self, Filter::Include)
    }

    pub fn is_exclude(&self) -> bool {
        matches!(self, Filter::Exclude)
    }

    /// Attribute names this filter reads, sorted and deduplicated.
    pub fn referenced_properties(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_properties(&mut names);
        names.sort();
        names.dedup();
        names
    }

    fn collect_properties(&self, names: &mut Vec<String>) {
        match self {
            Filter::Include | Filter::Exclude | Filter::Id(_) => {}
            Filter::Not(inner) => inner.collect_properties(names),
            Filter::And(filters) | Filter::Or(filters) => {
                for f in filters {
                    f.collect_properties(names);
                }
            }
            Filter::BBox { property, .. }
            | Filter::Comparison { property, .. }
            | Filter::Like { property, .. }
            | Filter::IsNull(property) => names.push(property.clone()),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Include => write!(f, "INCLUDE"),
            Filter::Exclude => write!(f, "EXCLUDE"),
            Filter::Id(ids) => {
                let ids: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
                write!(f, "IN ({})", ids.join(", "))
            }
            Filter::BBox {
                property, envelope, ..
            } => write!(
                f,
                "BBOX({}, {}, {}, {}, {})",
                property, envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y
            ),
            Filter::Comparison {
                property,
                op,
                value,
            } => write!(f, "{} {} {}", property, op, value),
            Filter::Like {
                property, pattern, ..
            } => write!(f, "{} LIKE '{}'", property, pattern),
            Filter::IsNull(property) => write!(f, "{} IS NULL", property),
            Filter::And(filters) => {
                let parts: Vec<String> = filters.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(" AND "))
            }
            Filter::Or(filters) => {
                let parts: Vec<String> = filters.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(" OR "))
            }
            Filter::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}
