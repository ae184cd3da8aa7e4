//! `DescribeFeatureType` schema resolution.

use super::{AttributeDescriptor, AttributeType, GeometryKind, RecordSchema};
use crate::capabilities::{local_part, OperationKind, TypeCapability};
use crate::decode::exception::{is_exception_root, parse_exception_report};
use crate::error::{Result, WfsError};
use crate::transport::{send_checked, Transport, TransportMethod, WireRequest};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves the attribute shape of a remote feature type.
#[async_trait]
pub trait SchemaResolver: std::fmt::Debug + Send + Sync {
    async fn resolve(&self, capability: &TypeCapability) -> Result<RecordSchema>;
}

/// XSD and GML type names understood without further schema lookups.
///
/// Built once on first use and read-only afterwards.
static FOUNDATION_TYPES: Lazy<HashMap<&'static str, AttributeType>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for name in ["string", "normalizedString", "token", "anyURI", "NCName", "ID"] {
        m.insert(name, AttributeType::String);
    }
    for name in [
        "int",
        "integer",
        "long",
        "short",
        "byte",
        "nonNegativeInteger",
        "positiveInteger",
        "negativeInteger",
        "nonPositiveInteger",
        "unsignedLong",
        "unsignedInt",
        "unsignedShort",
        "unsignedByte",
    ] {
        m.insert(name, AttributeType::Integer);
    }
    for name in ["double", "float", "decimal"] {
        m.insert(name, AttributeType::Float);
    }
    m.insert("boolean", AttributeType::Boolean);
    m.insert("date", AttributeType::Date);
    m.insert("dateTime", AttributeType::DateTime);

    let geometry = [
        ("PointPropertyType", GeometryKind::Point),
        ("LineStringPropertyType", GeometryKind::LineString),
        ("CurvePropertyType", GeometryKind::LineString),
        ("PolygonPropertyType", GeometryKind::Polygon),
        ("SurfacePropertyType", GeometryKind::Polygon),
        ("MultiPointPropertyType", GeometryKind::MultiPoint),
        ("MultiLineStringPropertyType", GeometryKind::MultiLineString),
        ("MultiCurvePropertyType", GeometryKind::MultiLineString),
        ("MultiPolygonPropertyType", GeometryKind::MultiPolygon),
        ("MultiSurfacePropertyType", GeometryKind::MultiPolygon),
        ("GeometryPropertyType", GeometryKind::Any),
        ("GeometryAssociationType", GeometryKind::Any),
        ("MultiGeometryPropertyType", GeometryKind::Any),
    ];
    for (name, kind) in geometry {
        m.insert(name, AttributeType::Geometry(kind));
    }
    m
});

/// Map a (possibly prefixed) XSD type reference to a binding.
pub fn foundation_type(type_ref: &str) -> Option<AttributeType> {
    FOUNDATION_TYPES.get(local_part(type_ref)).copied()
}

/// Issues `DescribeFeatureType` over a [`Transport`] and reads the flat
/// element sequence of the type's complex type.
#[derive(Debug, Clone)]
pub struct DescribeFeatureTypeResolver {
    transport: Arc<dyn Transport>,
}

impl DescribeFeatureTypeResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SchemaResolver for DescribeFeatureTypeResolver {
    async fn resolve(&self, capability: &TypeCapability) -> Result<RecordSchema> {
        let endpoint = capability.describe_schema_endpoint.as_deref().ok_or_else(|| {
            WfsError::unsupported(OperationKind::DescribeFeatureType, TransportMethod::Get)
        })?;

        let response = send_checked(self.transport.as_ref(), &WireRequest::get(endpoint)).await?;
        let document = response.into_bytes().await?;
        let schema = parse_feature_schema(&document, capability)?;

        tracing::debug!(
            type_name = %capability.name,
            attributes = schema.attributes.len(),
            "Resolved feature type schema"
        );
        Ok(schema)
    }
}

#[derive(Debug, Default)]
struct ComplexType {
    elements: Vec<(String, Option<String>, bool)>,
}

#[derive(Debug)]
struct PendingElement {
    name: String,
    type_ref: Option<String>,
    nullable: bool,
    depth: usize,
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn element_nullable(e: &BytesStart<'_>) -> bool {
    attr(e, b"minOccurs").as_deref() == Some("0") || attr(e, b"nillable").as_deref() == Some("true")
}

/// Parse an XML Schema document into the record schema of `capability`.
pub fn parse_feature_schema(document: &[u8], capability: &TypeCapability) -> Result<RecordSchema> {
    let mut reader = Reader::from_reader(document);
    let mut buf = Vec::new();

    let mut stack: Vec<String> = Vec::new();
    let mut top_elements: HashMap<String, String> = HashMap::new();
    let mut complex_types: HashMap<String, ComplexType> = HashMap::new();
    let mut current_complex: Option<(String, usize)> = None;
    let mut pending: Option<PendingElement> = None;
    let mut inline_owner: Option<String> = None;
    let mut seen_root = false;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let parent = stack.last().map(|s| s.as_str()).unwrap_or("");

                if !seen_root {
                    seen_root = true;
                    if is_exception_root(local.as_bytes()) {
                        return Err(parse_exception_report(document));
                    }
                }

                match local.as_str() {
                    "element" if parent == "schema" => {
                        if let Some(name) = attr(e, b"name") {
                            match attr(e, b"type") {
                                Some(type_ref) => {
                                    top_elements.insert(name, local_part(&type_ref).to_string());
                                }
                                // Anonymous complex type declared inline
                                None => {
                                    top_elements.insert(name.clone(), format!("{}#inline", name));
                                    inline_owner = Some(name);
                                }
                            }
                        }
                    }
                    "complexType" => {
                        if current_complex.is_none() {
                            let name = match attr(e, b"name") {
                                Some(name) => Some(name),
                                None if parent == "element" => inline_owner
                                    .as_ref()
                                    .map(|owner| format!("{}#inline", owner)),
                                None => None,
                            };
                            if let Some(name) = name {
                                complex_types.entry(name.clone()).or_default();
                                current_complex = Some((name, stack.len()));
                            }
                        }
                    }
                    "element" if parent == "sequence" && pending.is_none() => {
                        if current_complex.is_some() {
                            if let Some(name) = attr(e, b"name").or_else(|| attr(e, b"ref")) {
                                let element = PendingElement {
                                    name: local_part(&name).to_string(),
                                    type_ref: attr(e, b"type"),
                                    nullable: element_nullable(e),
                                    depth: stack.len(),
                                };
                                if is_start {
                                    pending = Some(element);
                                } else if let Some((ct, _)) = current_complex.as_ref() {
                                    complex_types.entry(ct.clone()).or_default().elements.push((
                                        element.name,
                                        element.type_ref,
                                        element.nullable,
                                    ));
                                }
                            }
                        }
                    }
                    "restriction" => {
                        if let Some(p) = pending.as_mut() {
                            if p.type_ref.is_none() {
                                p.type_ref = attr(e, b"base");
                            }
                        }
                    }
                    _ => {}
                }

                if is_start {
                    stack.push(local);
                }
            }
            Event::End(_) => {
                let local = stack.pop().unwrap_or_default();
                if local == "element" {
                    let closes_pending = pending
                        .as_ref()
                        .map(|p| p.depth == stack.len())
                        .unwrap_or(false);
                    if closes_pending {
                        if let (Some(p), Some((ct, _))) = (pending.take(), current_complex.as_ref())
                        {
                            complex_types
                                .entry(ct.clone())
                                .or_default()
                                .elements
                                .push((p.name, p.type_ref, p.nullable));
                        }
                    }
                } else if local == "complexType" {
                    let closes_current = current_complex
                        .as_ref()
                        .map(|(_, depth)| *depth == stack.len())
                        .unwrap_or(false);
                    if closes_current {
                        current_complex = None;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let type_local = capability.local_name();
    let complex_name = top_elements
        .get(type_local)
        .cloned()
        .filter(|name| complex_types.contains_key(name))
        .or_else(|| {
            let conventional = format!("{}Type", type_local);
            complex_types.contains_key(&conventional).then_some(conventional)
        })
        .or_else(|| {
            (complex_types.len() == 1)
                .then(|| complex_types.keys().next().cloned())
                .flatten()
        })
        .ok_or_else(|| {
            WfsError::schema(format!(
                "No complex type describing {} in schema document",
                capability.name
            ))
        })?;

    let complex = complex_types.remove(&complex_name).unwrap_or_default();
    let mut attributes = Vec::with_capacity(complex.elements.len());
    for (name, type_ref, nullable) in complex.elements {
        let binding = match type_ref.as_deref().and_then(foundation_type) {
            Some(binding) => binding,
            None => {
                tracing::debug!(
                    type_name = %capability.name,
                    attribute = %name,
                    xsd_type = ?type_ref,
                    "Unmapped attribute type, reading as string"
                );
                AttributeType::String
            }
        };
        let descriptor = match binding {
            AttributeType::Geometry(kind) => {
                AttributeDescriptor::geometry(name, kind, capability.native_crs.clone())
            }
            other => AttributeDescriptor::new(name, other),
        };
        attributes.push(descriptor.with_nullable(nullable));
    }

    if attributes.is_empty() {
        return Err(WfsError::schema(format!(
            "Type {} declares no attributes",
            capability.name
        )));
    }

    Ok(RecordSchema::new(capability.name.clone(), attributes))
}
