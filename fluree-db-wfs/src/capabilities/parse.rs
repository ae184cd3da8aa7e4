//! Streaming walk over a WFS 1.1 capabilities document.

use super::{OperationKind, TypeCapability};
use crate::crs::{Crs, Envelope};
use crate::decode::exception::{is_exception_root, parse_exception_report};
use crate::error::{Result, WfsError};
use crate::transport::TransportMethod;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeSet, HashMap};

const ROOT: &str = "WFS_Capabilities";

#[derive(Debug, Default)]
pub(super) struct ParsedCapabilities {
    pub version: String,
    pub service_title: String,
    pub types: Vec<TypeCapability>,
    pub operations: Vec<(OperationKind, TransportMethod, String)>,
    pub parameters: HashMap<(OperationKind, String), Vec<String>>,
    pub default_max_features: Option<u64>,
}

#[derive(Debug, Default)]
struct TypeBuilder {
    name: String,
    title: String,
    abstract_text: String,
    keywords: BTreeSet<String>,
    native_crs: Option<Crs>,
    other_crs: Vec<Crs>,
    lower: Option<(f64, f64)>,
    upper: Option<(f64, f64)>,
}

impl TypeBuilder {
    fn finish(self) -> Option<TypeCapability> {
        if self.name.is_empty() {
            return None;
        }
        let declared_bounds = match (self.lower, self.upper) {
            (Some((x0, y0)), Some((x1, y1))) => Some(Envelope::new(x0, y0, x1, y1)),
            _ => None,
        };
        Some(TypeCapability {
            name: self.name,
            title: self.title,
            abstract_text: self.abstract_text,
            keywords: self.keywords,
            native_crs: self.native_crs,
            other_crs: self.other_crs,
            declared_bounds,
            // WGS84BoundingBox is longitude/latitude by definition
            declared_bounds_crs: Crs::wgs84(),
            describe_schema_endpoint: None,
        })
    }
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_corner(text: &str) -> Option<(f64, f64)> {
    let mut parts = text.split_whitespace().map(|p| p.parse::<f64>());
    match (parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y))) => Some((x, y)),
        _ => None,
    }
}

fn parse_crs(text: &str, type_name: &str) -> Option<Crs> {
    match Crs::parse(text) {
        Ok(crs) => Some(crs),
        Err(e) => {
            tracing::warn!(type_name, srs = text, error = %e, "Ignoring unrecognized SRS");
            None
        }
    }
}

pub(super) fn parse_capabilities(document: &[u8]) -> Result<ParsedCapabilities> {
    let mut reader = Reader::from_reader(document);
    let mut buf = Vec::new();
    let mut out = ParsedCapabilities::default();

    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut seen_root = false;

    let mut current_op: Option<OperationKind> = None;
    let mut current_param: Option<String> = None;
    let mut current_constraint: Option<String> = None;
    let mut current_type: Option<TypeBuilder> = None;

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| WfsError::malformed(format!("Unreadable capabilities XML: {}", e)))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

                if !seen_root {
                    seen_root = true;
                    if is_exception_root(local.as_bytes()) {
                        return Err(parse_exception_report(document));
                    }
                    if local != ROOT {
                        return Err(WfsError::malformed(format!(
                            "Expected root element {}, found {}",
                            ROOT, local
                        )));
                    }
                    out.version = attr_value(e, b"version").unwrap_or_default();
                }

                match local.as_str() {
                    "Operation" => {
                        current_op = attr_value(e, b"name")
                            .as_deref()
                            .and_then(OperationKind::from_name);
                    }
                    "Get" | "Post" if stack.last().map(|s| s == "HTTP").unwrap_or(false) => {
                        let method = if local == "Get" {
                            TransportMethod::Get
                        } else {
                            TransportMethod::Post
                        };
                        if let (Some(kind), Some(href)) = (current_op, attr_value(e, b"href")) {
                            out.operations.push((kind, method, href));
                        }
                    }
                    "Parameter" => current_param = attr_value(e, b"name"),
                    "Constraint" => current_constraint = attr_value(e, b"name"),
                    "FeatureType" => current_type = Some(TypeBuilder::default()),
                    _ => {}
                }

                if is_start {
                    stack.push(local);
                    text.clear();
                }
            }
            Event::Text(ref e) => {
                let unescaped = e
                    .unescape()
                    .map_err(|e| WfsError::malformed(format!("Bad text content: {}", e)))?;
                text.push_str(&unescaped);
            }
            Event::CData(ref e) => text.push_str(&String::from_utf8_lossy(e)),
            Event::End(_) => {
                let local = stack.pop().unwrap_or_default();
                let parent = stack.last().map(|s| s.as_str()).unwrap_or("");
                let value = text.trim().to_string();
                text.clear();

                match (local.as_str(), parent) {
                    ("Title", "ServiceIdentification") => out.service_title = value,
                    ("Title", "FeatureType") => {
                        if let Some(t) = current_type.as_mut() {
                            t.title = value;
                        }
                    }
                    ("Name", "FeatureType") => {
                        if let Some(t) = current_type.as_mut() {
                            t.name = value;
                        }
                    }
                    ("Abstract", "FeatureType") => {
                        if let Some(t) = current_type.as_mut() {
                            t.abstract_text = value;
                        }
                    }
                    ("Keyword", _) => {
                        if let Some(t) = current_type.as_mut() {
                            if !value.is_empty() {
                                t.keywords.insert(value);
                            }
                        }
                    }
                    ("DefaultSRS", _) => {
                        if let Some(t) = current_type.as_mut() {
                            t.native_crs = parse_crs(&value, &t.name);
                        }
                    }
                    ("OtherSRS", _) => {
                        if let Some(t) = current_type.as_mut() {
                            if let Some(crs) = parse_crs(&value, &t.name) {
                                t.other_crs.push(crs);
                            }
                        }
                    }
                    ("LowerCorner", "WGS84BoundingBox") => {
                        if let Some(t) = current_type.as_mut() {
                            t.lower = parse_corner(&value);
                        }
                    }
                    ("UpperCorner", "WGS84BoundingBox") => {
                        if let Some(t) = current_type.as_mut() {
                            t.upper = parse_corner(&value);
                        }
                    }
                    ("Value", "Parameter") => {
                        if let (Some(kind), Some(param)) = (current_op, current_param.as_ref()) {
                            out.parameters
                                .entry((kind, param.clone()))
                                .or_default()
                                .push(value);
                        }
                    }
                    ("Value", "Constraint")
                    | ("DefaultValue", "Constraint") => {
                        let is_limit = current_constraint
                            .as_deref()
                            .map(|c| c == "DefaultMaxFeatures" || c == "CountDefault")
                            .unwrap_or(false);
                        if is_limit {
                            out.default_max_features =
                                value.parse::<u64>().ok().filter(|v| *v > 0);
                        }
                    }
                    ("Operation", _) => current_op = None,
                    ("Parameter", _) => current_param = None,
                    ("Constraint", _) => current_constraint = None,
                    ("FeatureType", _) => {
                        if let Some(ty) = current_type.take().and_then(TypeBuilder::finish) {
                            out.types.push(ty);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(WfsError::malformed("Document has no root element"));
    }

    Ok(out)
}
