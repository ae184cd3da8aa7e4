//! Filter Encoding 1.1 serialization.

use super::{Filter, Literal};
use crate::error::{Result, WfsError};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

pub const OGC_NS: &str = "http://www.opengis.net/ogc";
pub const GML_NS: &str = "http://www.opengis.net/gml";

/// Serializes a filter into the service's predicate language.
pub trait FilterEncoder: Send + Sync + std::fmt::Debug {
    /// Encode a complete filter document.
    ///
    /// `Include` and `Exclude` have no wire form; callers omit the filter
    /// parameter for `Include` and never send a request for `Exclude`.
    fn encode(&self, filter: &Filter) -> Result<String>;
}

/// `ogc:Filter` XML encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct OgcFilterEncoder;

impl FilterEncoder for OgcFilterEncoder {
    fn encode(&self, filter: &Filter) -> Result<String> {
        let mut w = FilterWriter::new();
        w.start(
            BytesStart::new("ogc:Filter")
                .with_attributes([("xmlns:ogc", OGC_NS), ("xmlns:gml", GML_NS)]),
        )?;
        w.filter(filter)?;
        w.end("ogc:Filter")?;
        w.finish()
    }
}

struct FilterWriter {
    writer: Writer<Vec<u8>>,
}

impl FilterWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| WfsError::predicate_encoding(format!("XML write failed: {}", e)))
    }

    fn start(&mut self, tag: BytesStart<'_>) -> Result<()> {
        self.write(Event::Start(tag))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(BytesStart::new(name))?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn property(&mut self, name: &str) -> Result<()> {
        self.text_element("ogc:PropertyName", name)
    }

    fn filter(&mut self, filter: &Filter) -> Result<()> {
        match filter {
            Filter::Include | Filter::Exclude => Err(WfsError::predicate_encoding(format!(
                "{} has no Filter Encoding form",
                filter
            ))),
            Filter::Id(ids) => {
                if ids.is_empty() {
                    return Err(WfsError::predicate_encoding("Empty identifier set"));
                }
                for id in ids {
                    self.write(Event::Empty(
                        BytesStart::new("ogc:FeatureId").with_attributes([("fid", id.as_str())]),
                    ))?;
                }
                Ok(())
            }
            Filter::BBox {
                property,
                envelope,
                crs,
            } => {
                self.start(BytesStart::new("ogc:BBOX"))?;
                self.property(property)?;
                let mut env = BytesStart::new("gml:Envelope");
                if let Some(crs) = crs {
                    env.push_attribute(("srsName", crs.to_srs_name().as_str()));
                }
                self.start(env)?;
                self.text_element(
                    "gml:lowerCorner",
                    &format!("{} {}", envelope.min_x, envelope.min_y),
                )?;
                self.text_element(
                    "gml:upperCorner",
                    &format!("{} {}", envelope.max_x, envelope.max_y),
                )?;
                self.end("gml:Envelope")?;
                self.end("ogc:BBOX")
            }
            Filter::Comparison {
                property,
                op,
                value,
            } => {
                let name = format!("ogc:{}", op.element_name());
                self.start(BytesStart::new(name.as_str()))?;
                self.property(property)?;
                self.text_element("ogc:Literal", &literal_text(value))?;
                self.end(&name)
            }
            Filter::Like {
                property,
                pattern,
                wildcard,
                single_char,
                escape,
            } => {
                let (w, s, e) = (
                    wildcard.to_string(),
                    single_char.to_string(),
                    escape.to_string(),
                );
                self.start(BytesStart::new("ogc:PropertyIsLike").with_attributes([
                    ("wildCard", w.as_str()),
                    ("singleChar", s.as_str()),
                    ("escapeChar", e.as_str()),
                ]))?;
                self.property(property)?;
                self.text_element("ogc:Literal", pattern)?;
                self.end("ogc:PropertyIsLike")
            }
            Filter::IsNull(property) => {
                self.start(BytesStart::new("ogc:PropertyIsNull"))?;
                self.property(property)?;
                self.end("ogc:PropertyIsNull")
            }
            Filter::And(children) => self.logical("ogc:And", children),
            Filter::Or(children) => self.logical("ogc:Or", children),
            Filter::Not(inner) => {
                self.start(BytesStart::new("ogc:Not"))?;
                self.filter(inner)?;
                self.end("ogc:Not")
            }
        }
    }

    fn logical(&mut self, name: &str, children: &[Filter]) -> Result<()> {
        self.start(BytesStart::new(name))?;
        for child in children {
            self.filter(child)?;
        }
        self.end(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| WfsError::predicate_encoding(format!("Non UTF-8 output: {}", e)))
    }
}

fn literal_text(value: &Literal) -> String {
    value.to_string()
}
