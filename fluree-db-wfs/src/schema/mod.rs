//! Feature type schemas and decoded feature records.
//!
//! - [`RecordSchema`] - ordered attribute descriptors for one feature type
//! - [`Feature`] - one decoded record, values positionally aligned with its schema
//! - [`cache`] - per-session memoized `DescribeFeatureType` results
//! - [`resolver`] - the `DescribeFeatureType` collaborator

pub mod cache;
pub mod resolver;

pub use cache::SchemaCache;
pub use resolver::{DescribeFeatureTypeResolver, SchemaResolver};

use crate::crs::{Crs, Envelope};
use crate::error::{Result, WfsError};
use geo_types::Geometry;
use std::fmt;
use std::sync::Arc;

/// Geometry kinds a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    /// Any geometry (`gml:GeometryPropertyType`)
    Any,
}

/// Attribute value bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Geometry(GeometryKind),
}

impl AttributeType {
    pub fn is_geometry(&self) -> bool {
        matches!(self, Self::Geometry(_))
    }
}

/// One attribute of a feature type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub binding: AttributeType,
    pub nullable: bool,
    /// Reference system of geometry attributes; `None` for scalars.
    pub crs: Option<Crs>,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, binding: AttributeType) -> Self {
        Self {
            name: name.into(),
            binding,
            nullable: true,
            crs: None,
        }
    }

    pub fn geometry(name: impl Into<String>, kind: GeometryKind, crs: Option<Crs>) -> Self {
        Self {
            name: name.into(),
            binding: AttributeType::Geometry(kind),
            nullable: true,
            crs,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Shape of a feature type.
///
/// Equality is structural: attribute names, order, bindings, and the
/// reference system of geometry attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    pub type_name: String,
    pub attributes: Vec<AttributeDescriptor>,
    /// Name of the default geometry attribute, if any.
    pub default_geometry: Option<String>,
}

impl RecordSchema {
    /// Create a schema; the first geometry attribute becomes the default geometry.
    pub fn new(type_name: impl Into<String>, attributes: Vec<AttributeDescriptor>) -> Self {
        let default_geometry = attributes
            .iter()
            .find(|a| a.binding.is_geometry())
            .map(|a| a.name.clone());
        Self {
            type_name: type_name.into(),
            attributes,
            default_geometry,
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    pub fn default_geometry_attribute(&self) -> Option<&AttributeDescriptor> {
        self.default_geometry
            .as_deref()
            .and_then(|name| self.attribute(name))
    }

    /// Derive a schema holding only `names`, in the given order.
    pub fn project(&self, names: &[String]) -> Result<RecordSchema> {
        let mut attributes = Vec::with_capacity(names.len());
        for name in names {
            let attr = self.attribute(name).ok_or_else(|| {
                WfsError::schema(format!(
                    "Property '{}' not found in type {}",
                    name, self.type_name
                ))
            })?;
            attributes.push(attr.clone());
        }
        let default_geometry = self
            .default_geometry
            .clone()
            .filter(|g| names.iter().any(|n| n == g))
            .or_else(|| {
                attributes
                    .iter()
                    .find(|a| a.binding.is_geometry())
                    .map(|a| a.name.clone())
            });
        Ok(RecordSchema {
            type_name: self.type_name.clone(),
            attributes,
            default_geometry,
        })
    }

    /// Copy of this schema with every geometry attribute in `crs`.
    pub fn with_geometry_crs(&self, crs: &Crs) -> RecordSchema {
        let mut schema = self.clone();
        for attr in schema.attributes.iter_mut() {
            if attr.binding.is_geometry() {
                attr.crs = Some(crs.clone());
            }
        }
        schema
    }
}

/// A geometry value tagged with the reference system it was decoded in.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryValue {
    pub geometry: Geometry<f64>,
    pub crs: Option<Crs>,
}

impl GeometryValue {
    pub fn new(geometry: Geometry<f64>, crs: Option<Crs>) -> Self {
        Self { geometry, crs }
    }

    pub fn envelope(&self) -> Option<Envelope> {
        Envelope::from_geometry(&self.geometry)
    }
}

/// Decoded attribute values.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AttributeValue {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Geometry(GeometryValue),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Parse wire text into the value for `binding`.
    ///
    /// Dates stay strings: ISO-8601 text compares correctly as-is.
    pub fn parse(text: &str, binding: AttributeType) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::Null);
        }
        let parse_err =
            |kind: &str| WfsError::schema(format!("Cannot parse '{}' as {}", text, kind));
        match binding {
            AttributeType::String | AttributeType::Date | AttributeType::DateTime => {
                Ok(Self::String(text.to_string()))
            }
            AttributeType::Integer => text
                .parse::<i64>()
                .map(Self::Integer)
                .map_err(|_| parse_err("integer")),
            AttributeType::Float => text
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|_| parse_err("float")),
            AttributeType::Boolean => match text {
                "true" | "1" => Ok(Self::Boolean(true)),
                "false" | "0" => Ok(Self::Boolean(false)),
                _ => Err(parse_err("boolean")),
            },
            AttributeType::Geometry(_) => Err(WfsError::schema(
                "Geometry values are decoded from GML, not text",
            )),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Geometry(g) => write!(f, "geometry({:?})", g.crs),
        }
    }
}

/// One decoded feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Feature identifier (`gml:id`)
    pub id: String,
    /// Values aligned with the schema of the cursor that produced them
    pub values: Vec<AttributeValue>,
}

impl Feature {
    pub fn new(id: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }

    /// Look up a value by attribute name.
    pub fn value<'a>(&'a self, schema: &RecordSchema, name: &str) -> Option<&'a AttributeValue> {
        schema.index_of(name).and_then(|i| self.values.get(i))
    }
}

/// Shared schema handle handed out by cursors.
pub type SchemaRef = Arc<RecordSchema>;

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn roads_schema() -> RecordSchema {
        RecordSchema::new(
            "topp:roads",
            vec![
                AttributeDescriptor::geometry(
                    "the_geom",
                    GeometryKind::MultiLineString,
                    Some(Crs::epsg(4326)),
                ),
                AttributeDescriptor::new("name", AttributeType::String),
                AttributeDescriptor::new("lanes", AttributeType::Integer),
            ],
        )
    }

    #[test]
    fn test_default_geometry_is_first_geometry() {
        let schema = roads_schema();
        assert_eq!(schema.default_geometry.as_deref(), Some("the_geom"));
        assert_eq!(schema.index_of("lanes"), Some(2));
    }

    #[test]
    fn test_project_reorders_and_rejects_unknown() {
        let schema = roads_schema();
        let projected = schema
            .project(&["lanes".to_string(), "name".to_string()])
            .unwrap();
        assert_eq!(
            projected.attribute_names().collect::<Vec<_>>(),
            vec!["lanes", "name"]
        );
        assert!(projected.default_geometry.is_none());

        let err = schema.project(&["width".to_string()]).unwrap_err();
        assert!(matches!(err, WfsError::Schema(_)));
    }

    #[test]
    fn test_structural_equality_includes_geometry_crs() {
        let schema = roads_schema();
        assert_eq!(schema, roads_schema());
        assert_ne!(schema, schema.with_geometry_crs(&Crs::epsg(3857)));
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(
            AttributeValue::parse("42", AttributeType::Integer).unwrap(),
            AttributeValue::Integer(42)
        );
        assert_eq!(
            AttributeValue::parse(" ", AttributeType::Integer).unwrap(),
            AttributeValue::Null
        );
        assert_eq!(
            AttributeValue::parse("true", AttributeType::Boolean).unwrap(),
            AttributeValue::Boolean(true)
        );
        assert!(AttributeValue::parse("x", AttributeType::Float).is_err());
    }
}
