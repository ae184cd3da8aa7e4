//! Response decoding.
//!
//! - [`RecordCursor`] - pull-based, single-pass record stream with explicit close
//! - [`gml`] - streaming `wfs:FeatureCollection` decoder
//! - [`geometry`] - GML geometry reading
//! - [`exception`] - OWS exception reports

pub mod exception;
pub mod geometry;
pub mod gml;
pub mod xml;

pub use gml::{parse_hits, GmlRecordCursor};

use crate::error::Result;
use crate::schema::{Feature, SchemaRef};
use async_trait::async_trait;

/// A single-owner cursor over decoded features.
///
/// `next` yields `Ok(None)` once at end of stream; calling it again, or
/// after `close`, is `CursorExhausted`. `close` is idempotent and safe at
/// any point.
#[async_trait]
pub trait RecordCursor: Send + std::fmt::Debug {
    /// Schema of every feature this cursor yields. Never changes.
    fn schema(&self) -> SchemaRef;

    async fn next(&mut self) -> Result<Option<Feature>>;

    async fn close(&mut self) -> Result<()>;
}

/// Drain `cursor` into a vector, closing it on every path.
pub async fn collect_features(cursor: &mut dyn RecordCursor) -> Result<Vec<Feature>> {
    let mut features = Vec::new();
    let drained = loop {
        match cursor.next().await {
            Ok(Some(feature)) => features.push(feature),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let closed = cursor.close().await;
    drained?;
    closed?;
    Ok(features)
}
