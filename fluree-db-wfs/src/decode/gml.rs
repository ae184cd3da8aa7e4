//! Streaming `wfs:FeatureCollection` decoding.
//!
//! The body stream is fed to an async quick-xml reader. Events are consumed
//! one record at a time: a record element is read into a small tree, decoded
//! and dropped before the next event is pulled, so memory use is bounded by
//! the largest record rather than the response.

use super::exception::{exception_from_node, is_exception_root, parse_exception_report};
use super::geometry::parse_geometry;
use super::xml::XmlNode;
use super::RecordCursor;
use crate::error::{Result, WfsError};
use crate::schema::{AttributeValue, Feature, RecordSchema, SchemaRef};
use crate::transport::ByteStream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use quick_xml::errors::SyntaxError;
use quick_xml::events::Event;
use quick_xml::{NsReader, Reader};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;

const COLLECTION_ROOT: &str = "FeatureCollection";

type BodyReader = NsReader<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>>;

/// One reader event, detached from the reader's buffer.
#[derive(Debug)]
enum Step {
    Open(XmlNode),
    Leaf(XmlNode),
    Text(String),
    Close(String),
    Eof,
    Skip,
}

fn body_reader(stream: ByteStream) -> BodyReader {
    let stream = stream
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed();
    NsReader::from_reader(StreamReader::new(stream))
}

/// Map a reader failure back to the error the caller should see.
///
/// Transport errors travel through the reader wrapped in `io::Error` and are
/// unwrapped again here. Syntax errors other than bad `<!` markup are only
/// raised when input ends inside a construct, so they count as truncation.
fn read_error(err: quick_xml::Error) -> WfsError {
    match err {
        quick_xml::Error::Io(io_err) => match Arc::try_unwrap(io_err) {
            Ok(io_err) => match io_err.into_inner().map(|inner| inner.downcast::<WfsError>()) {
                Some(Ok(inner)) => *inner,
                Some(Err(inner)) => WfsError::Io(inner.to_string()),
                None => WfsError::Io("Response body could not be read".to_string()),
            },
            Err(shared) => WfsError::Io(shared.to_string()),
        },
        quick_xml::Error::Syntax(e) if !matches!(e, SyntaxError::InvalidBangMarkup) => {
            WfsError::Io(format!("Response ended inside markup: {}", e))
        }
        other => other.into(),
    }
}

async fn next_step(reader: &mut BodyReader, buf: &mut Vec<u8>) -> Result<Step> {
    buf.clear();
    let event = reader
        .read_event_into_async(buf)
        .await
        .map_err(read_error)?;
    Ok(match event {
        Event::Start(e) => Step::Open(XmlNode::from_start(&e)?),
        Event::Empty(e) => Step::Leaf(XmlNode::from_start(&e)?),
        Event::Text(e) => Step::Text(e.unescape()?.into_owned()),
        Event::CData(e) => Step::Text(String::from_utf8_lossy(&e).into_owned()),
        Event::End(e) => {
            Step::Close(String::from_utf8_lossy(e.local_name().as_ref()).into_owned())
        }
        Event::Eof => Step::Eof,
        _ => Step::Skip,
    })
}

/// Read the rest of the element whose start tag produced `root`.
async fn read_subtree(
    reader: &mut BodyReader,
    buf: &mut Vec<u8>,
    root: XmlNode,
) -> Result<XmlNode> {
    let mut stack = vec![root];
    loop {
        match next_step(reader, buf).await? {
            Step::Open(node) => stack.push(node),
            Step::Leaf(node) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Step::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Step::Close(_) => {
                if let Some(node) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => return Ok(node),
                    }
                }
            }
            Step::Eof => {
                let name = stack.first().map(|n| n.name.clone()).unwrap_or_default();
                return Err(WfsError::Io(format!(
                    "Response ended inside a {} element",
                    name
                )));
            }
            Step::Skip => {}
        }
    }
}

/// Read `numberOfFeatures` (WFS 1.1) or `numberMatched` (WFS 2.0) from a
/// collection root.
fn collection_count(root: &XmlNode) -> Option<u64> {
    root.attr("numberOfFeatures")
        .or_else(|| root.attr("numberMatched"))
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parse a `resultType=hits` response.
pub fn parse_hits(document: &[u8]) -> Result<u64> {
    let mut reader = Reader::from_reader(document);
    let mut buf = Vec::new();
    let root = loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => break XmlNode::from_start(&e)?,
            Event::Eof => return Err(WfsError::xml("Empty hits response")),
            Event::Text(e) if !e.iter().all(u8::is_ascii_whitespace) => {
                return Err(WfsError::xml("Hits response is not an XML document"))
            }
            _ => {}
        }
    };
    if is_exception_root(root.name.as_bytes()) {
        return Err(parse_exception_report(document));
    }
    if root.name != COLLECTION_ROOT {
        return Err(WfsError::xml(format!(
            "Expected {} in hits response, found {}",
            COLLECTION_ROOT, root.name
        )));
    }
    collection_count(&root).ok_or_else(|| WfsError::xml("Hits response carries no feature count"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    /// End of stream reported to the caller
    Finished,
    Closed,
}

/// Lazily decodes features of one type from a GetFeature response.
pub struct GmlRecordCursor {
    schema: SchemaRef,
    record_name: String,
    reader: Option<BodyReader>,
    buf: Vec<u8>,
    root_closed: bool,
    lookahead: Option<Feature>,
    drained: bool,
    state: State,
    number_of_features: Option<u64>,
    yielded: u64,
}

impl fmt::Debug for GmlRecordCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GmlRecordCursor")
            .field("record_name", &self.record_name)
            .field("state", &self.state)
            .field("root_closed", &self.root_closed)
            .field("yielded", &self.yielded)
            .finish_non_exhaustive()
    }
}

impl GmlRecordCursor {
    /// Start decoding `stream`.
    ///
    /// Reads up to the first record so an exception report fails here,
    /// before any record is handed out, and so an empty result is known
    /// up front via [`GmlRecordCursor::is_exhausted`].
    ///
    /// `record_name` is the local name of the record element; `schema` is
    /// the shape decoded values are aligned to.
    pub async fn open(
        stream: ByteStream,
        record_name: impl Into<String>,
        schema: SchemaRef,
    ) -> Result<Self> {
        let mut cursor = Self {
            schema,
            record_name: record_name.into(),
            reader: Some(body_reader(stream)),
            buf: Vec::new(),
            root_closed: false,
            lookahead: None,
            drained: false,
            state: State::Open,
            number_of_features: None,
            yielded: 0,
        };
        cursor.read_root().await?;
        cursor.lookahead = cursor.read_record().await?;
        cursor.drained = cursor.lookahead.is_none();
        tracing::debug!(
            record = %cursor.record_name,
            number_of_features = ?cursor.number_of_features,
            empty = cursor.drained,
            "Opened feature stream"
        );
        Ok(cursor)
    }

    /// Whether the response held no records at all.
    pub fn is_exhausted(&self) -> bool {
        self.drained && self.lookahead.is_none()
    }

    /// Count the server announced on the collection, if any.
    pub fn number_of_features(&self) -> Option<u64> {
        self.number_of_features
    }

    async fn read_root(&mut self) -> Result<()> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Err(WfsError::exhausted("cursor already closed")),
        };
        loop {
            let (root, self_closing) = match next_step(reader, &mut self.buf).await? {
                Step::Open(node) => (node, false),
                Step::Leaf(node) => (node, true),
                Step::Text(text) if !text.trim().is_empty() => {
                    return Err(WfsError::xml("Response is not an XML document"))
                }
                Step::Eof => {
                    return Err(WfsError::xml("Response ended before the document root"))
                }
                _ => continue,
            };
            if is_exception_root(root.name.as_bytes()) {
                let report = if self_closing {
                    root
                } else {
                    read_subtree(reader, &mut self.buf, root).await?
                };
                return Err(exception_from_node(&report));
            }
            if root.name != COLLECTION_ROOT {
                return Err(WfsError::xml(format!(
                    "Expected {} response, found {}",
                    COLLECTION_ROOT, root.name
                )));
            }
            self.number_of_features = collection_count(&root);
            self.root_closed = self_closing;
            return Ok(());
        }
    }

    async fn read_record(&mut self) -> Result<Option<Feature>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };
        while !self.root_closed {
            match next_step(reader, &mut self.buf).await? {
                Step::Open(node) if node.name == self.record_name => {
                    let record = read_subtree(reader, &mut self.buf, node).await?;
                    return decode(&self.schema, &record).map(Some);
                }
                Step::Leaf(node) if node.name == self.record_name => {
                    return decode(&self.schema, &node).map(Some);
                }
                Step::Open(node) if is_exception_root(node.name.as_bytes()) => {
                    let report = read_subtree(reader, &mut self.buf, node).await?;
                    return Err(exception_from_node(&report));
                }
                Step::Leaf(node) if is_exception_root(node.name.as_bytes()) => {
                    return Err(exception_from_node(&node));
                }
                Step::Close(name) if name == COLLECTION_ROOT => self.root_closed = true,
                Step::Eof => {
                    // A stream that stops before the collection closes lost records
                    return Err(WfsError::Io(format!(
                        "Response ended before {} was closed ({} records read)",
                        COLLECTION_ROOT, self.yielded
                    )));
                }
                // Member wrappers, boundedBy and the like
                _ => {}
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        self.reader = None;
        self.lookahead = None;
        self.buf = Vec::new();
    }
}

fn decode(schema: &RecordSchema, node: &XmlNode) -> Result<Feature> {
    let id = node
        .attr("id")
        .or_else(|| node.attr("fid"))
        .unwrap_or_default()
        .to_string();

    let mut values = Vec::with_capacity(schema.attributes.len());
    for attribute in &schema.attributes {
        let value = match property_node(node, &attribute.name) {
            None => AttributeValue::Null,
            Some(prop) if prop.attr("nil") == Some("true") => AttributeValue::Null,
            Some(prop) if attribute.binding.is_geometry() => match prop.first_child() {
                Some(geom) => {
                    AttributeValue::Geometry(parse_geometry(geom, attribute.crs.as_ref())?)
                }
                None => AttributeValue::Null,
            },
            Some(prop) => AttributeValue::parse(&prop.text, attribute.binding)
                .map_err(|e| WfsError::xml(format!("Record {}: {}", id, e)))?,
        };
        values.push(value);
    }
    Ok(Feature::new(id, values))
}

/// Property element for `name`, preferring application properties over
/// GML's own (`gml:name`, `gml:description`).
fn property_node<'a>(record: &'a XmlNode, name: &str) -> Option<&'a XmlNode> {
    let mut gml_match = None;
    for child in record.children.iter().filter(|c| c.name == name) {
        if child.prefix.as_deref() == Some("gml") {
            gml_match = gml_match.or(Some(child));
        } else {
            return Some(child);
        }
    }
    gml_match
}

#[async_trait]
impl RecordCursor for GmlRecordCursor {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    async fn next(&mut self) -> Result<Option<Feature>> {
        match self.state {
            State::Finished => return Err(WfsError::exhausted("next() after end of stream")),
            State::Closed => return Err(WfsError::exhausted("next() on a closed cursor")),
            State::Open => {}
        }

        let next = match self.lookahead.take() {
            Some(feature) => Ok(Some(feature)),
            None if self.drained => Ok(None),
            None => self.read_record().await,
        };

        match next {
            Ok(Some(feature)) => {
                self.yielded += 1;
                Ok(Some(feature))
            }
            Ok(None) => {
                tracing::debug!(
                    record = %self.record_name,
                    yielded = self.yielded,
                    "Feature stream complete"
                );
                self.state = State::Finished;
                self.release();
                Ok(None)
            }
            Err(e) => {
                self.state = State::Closed;
                self.release();
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == State::Open {
            self.state = State::Closed;
        }
        self.release();
        Ok(())
    }
}
