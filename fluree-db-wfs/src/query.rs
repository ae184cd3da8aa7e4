//! Declarative feature queries and query merging.

use crate::crs::Crs;
use crate::error::{Result, WfsError};
use crate::filter::Filter;
use std::fmt;

/// Which attributes a query returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropertySelection {
    /// Every attribute of the type, in schema order
    #[default]
    All,
    /// These attributes, in this order
    Explicit(Vec<String>),
}

impl PropertySelection {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Single-letter KVP token.
    pub fn kvp_token(&self) -> &'static str {
        match self {
            Self::Ascending => "A",
            Self::Descending => "D",
        }
    }

    /// Filter Encoding `SortOrder` value.
    pub fn xml_token(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    pub property: String,
    pub order: SortOrder,
}

impl SortBy {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            order: SortOrder::Descending,
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.property, self.order.kvp_token())
    }
}

/// A feature query. Plain value, cloned freely.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    /// `None` only for partial queries meant to be merged
    pub type_name: Option<String>,
    pub filter: Filter,
    pub properties: PropertySelection,
    /// `None` is unbounded
    pub max_features: Option<u64>,
    pub start_index: u64,
    pub sort_by: Vec<SortBy>,
    /// Reference system for returned geometries; native when `None`
    pub target_crs: Option<Crs>,
    /// Diagnostic label
    pub handle: Option<String>,
    /// Protocol version tag
    pub version: Option<String>,
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self {
            type_name: None,
            filter: Filter::Include,
            properties: PropertySelection::All,
            max_features: None,
            start_index: 0,
            sort_by: Vec::new(),
            target_crs: None,
            handle: None,
            version: None,
        }
    }
}

impl QueryDescriptor {
    /// Query everything of `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = PropertySelection::Explicit(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_features(mut self, max: u64) -> Self {
        self.max_features = Some(max);
        self
    }

    pub fn with_start_index(mut self, start: u64) -> Self {
        self.start_index = start;
        self
    }

    pub fn with_sort_by(mut self, sort: SortBy) -> Self {
        self.sort_by.push(sort);
        self
    }

    pub fn with_target_crs(mut self, crs: Crs) -> Self {
        self.target_crs = Some(crs);
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Type name, or a `Config` error for a partial query.
    pub fn require_type_name(&self) -> Result<&str> {
        self.type_name
            .as_deref()
            .ok_or_else(|| WfsError::config("Query does not name a feature type"))
    }
}

/// Combine a stored base query with a caller's query.
///
/// - `max_features` is the smaller bound, `start_index` the sum
/// - filters are conjoined
/// - explicit property lists are unioned in first-seen order; against
///   `All`, the explicit list wins
/// - `sort_by` comes from `a` unless it is empty
/// - `target_crs` is the first one set
pub fn merge(a: &QueryDescriptor, b: &QueryDescriptor, handle: &str) -> Result<QueryDescriptor> {
    let type_name = match (&a.type_name, &b.type_name) {
        (Some(left), Some(right)) if left != right => {
            return Err(WfsError::TypeMismatch {
                left: left.clone(),
                right: right.clone(),
            })
        }
        (left, right) => left.clone().or_else(|| right.clone()),
    };

    let version = match (&a.version, &b.version) {
        (Some(left), Some(right)) if left != right => {
            return Err(WfsError::VersionConflict {
                left: left.clone(),
                right: right.clone(),
            })
        }
        (left, right) => left.clone().or_else(|| right.clone()),
    };

    let max_features = match (a.max_features, b.max_features) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    };

    let properties = match (&a.properties, &b.properties) {
        (PropertySelection::All, PropertySelection::All) => PropertySelection::All,
        (PropertySelection::Explicit(names), PropertySelection::All)
        | (PropertySelection::All, PropertySelection::Explicit(names)) => {
            PropertySelection::Explicit(dedup_ordered(names.iter()))
        }
        (PropertySelection::Explicit(left), PropertySelection::Explicit(right)) => {
            PropertySelection::Explicit(dedup_ordered(left.iter().chain(right.iter())))
        }
    };

    let sort_by = if a.sort_by.is_empty() {
        b.sort_by.clone()
    } else {
        a.sort_by.clone()
    };

    Ok(QueryDescriptor {
        type_name,
        filter: Filter::and(vec![a.filter.clone(), b.filter.clone()]),
        properties,
        max_features,
        start_index: a.start_index.saturating_add(b.start_index),
        sort_by,
        target_crs: a.target_crs.clone().or_else(|| b.target_crs.clone()),
        handle: Some(handle.to_string()),
        version,
    })
}

fn dedup_ordered<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Envelope;

    #[test]
    fn test_merge_limits_are_order_independent() {
        let a = QueryDescriptor::new("topp:roads")
            .with_max_features(10)
            .with_start_index(5);
        let b = QueryDescriptor::new("topp:roads")
            .with_max_features(3)
            .with_start_index(2);
        let ab = merge(&a, &b, "ab").unwrap();
        let ba = merge(&b, &a, "ba").unwrap();
        assert_eq!(ab.max_features, Some(3));
        assert_eq!(ba.max_features, Some(3));
        assert_eq!(ab.start_index, 7);
        assert_eq!(ba.start_index, 7);

        let unbounded = QueryDescriptor::new("topp:roads");
        assert_eq!(merge(&unbounded, &b, "h").unwrap().max_features, Some(3));
        assert_eq!(merge(&unbounded, &unbounded, "h").unwrap().max_features, None);
    }

    #[test]
    fn test_merge_rejects_different_types() {
        let err = merge(
            &QueryDescriptor::new("Roads"),
            &QueryDescriptor::new("Rivers"),
            "h",
        )
        .unwrap_err();
        assert!(matches!(err, WfsError::TypeMismatch { .. }));

        let partial = QueryDescriptor::default().with_max_features(1);
        let merged = merge(&partial, &QueryDescriptor::new("Rivers"), "h").unwrap();
        assert_eq!(merged.type_name.as_deref(), Some("Rivers"));
    }

    #[test]
    fn test_merge_rejects_version_conflict() {
        let a = QueryDescriptor::new("Roads").with_version("1.0.0");
        let b = QueryDescriptor::new("Roads").with_version("1.1.0");
        assert!(matches!(
            merge(&a, &b, "h"),
            Err(WfsError::VersionConflict { .. })
        ));
        let c = QueryDescriptor::new("Roads");
        assert_eq!(merge(&a, &c, "h").unwrap().version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_merge_property_union_preserves_order() {
        let a = QueryDescriptor::new("Roads").with_properties(["A", "B"]);
        let b = QueryDescriptor::new("Roads").with_properties(["B", "C"]);
        assert_eq!(
            merge(&a, &b, "h").unwrap().properties,
            PropertySelection::Explicit(vec!["A".into(), "B".into(), "C".into()])
        );
    }

    #[test]
    fn test_merge_all_with_explicit_restricts() {
        let all = QueryDescriptor::new("Roads");
        let some = QueryDescriptor::new("Roads").with_properties(["name"]);
        let expected = PropertySelection::Explicit(vec!["name".into()]);
        assert_eq!(merge(&all, &some, "h").unwrap().properties, expected);
        assert_eq!(merge(&some, &all, "h").unwrap().properties, expected);
        assert!(merge(&all, &all, "h").unwrap().properties.is_all());
    }

    #[test]
    fn test_merge_filters_and_handle() {
        let bbox = Filter::bbox("the_geom", Envelope::new(0.0, 0.0, 1.0, 1.0), None);
        let a = QueryDescriptor::new("Roads").with_filter(bbox.clone());
        let b = QueryDescriptor::new("Roads").with_handle("caller");
        let merged = merge(&a, &b, "view+caller").unwrap();
        assert_eq!(merged.filter, bbox);
        assert_eq!(merged.handle.as_deref(), Some("view+caller"));

        let cmp = Filter::gt("lanes", 2);
        let merged = merge(&a, &b.with_filter(cmp.clone()), "h").unwrap();
        assert_eq!(merged.filter, Filter::And(vec![bbox, cmp]));

        let both_include = merge(&QueryDescriptor::new("Roads"), &QueryDescriptor::new("Roads"), "h");
        assert!(both_include.unwrap().filter.is_include());
    }

    #[test]
    fn test_merge_sort_and_crs() {
        let a = QueryDescriptor::new("Roads").with_target_crs(Crs::epsg(3857));
        let b = QueryDescriptor::new("Roads")
            .with_sort_by(SortBy::desc("lanes"))
            .with_target_crs(Crs::wgs84());
        let merged = merge(&a, &b, "h").unwrap();
        assert_eq!(merged.sort_by, vec![SortBy::desc("lanes")]);
        assert_eq!(merged.target_crs, Some(Crs::epsg(3857)));
        assert_eq!(SortBy::asc("name").to_string(), "name A");
    }
}
