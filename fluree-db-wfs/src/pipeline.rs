//! Cursor decorators that make a raw feature stream satisfy the query.
//!
//! Layers, innermost first:
//!
//! 1. [`EmptyCursor`] - stands in for the whole stack when nothing can match
//! 2. [`SchemaCoercion`] - reorders values and reprojects geometries
//! 3. [`LocalPredicateFilter`] - evaluates the filter part the server was not sent
//! 4. [`OffsetSkip`] - drops the first matches when paging could not be sent
//! 5. [`MaxCountTruncation`] - stops at the effective limit
//!
//! Every `wrap` constructor takes ownership of the inner cursor and closes
//! it before returning an error, so a partially built stack never leaks an
//! open stream.

use crate::crs::{Crs, CrsTransform};
use crate::decode::{GmlRecordCursor, RecordCursor};
use crate::error::{Result, WfsError};
use crate::filter::{evaluate::evaluate, Filter};
use crate::request::RequestPlan;
use crate::schema::{AttributeValue, Feature, GeometryValue, RecordSchema, SchemaRef};
use async_trait::async_trait;
use std::sync::Arc;

/// Close `inner` and hand back `err`. A close failure is logged; the
/// construction error is the one the caller needs.
async fn abort(mut inner: Box<dyn RecordCursor>, err: WfsError) -> WfsError {
    if let Err(close_err) = inner.close().await {
        tracing::warn!(error = %close_err, "Failed to close cursor after construction error");
    }
    err
}

/// Whether two schemas hold the same attributes, in the same order, with
/// the same bindings and geometry reference systems.
pub fn schemas_match(a: &RecordSchema, b: &RecordSchema) -> bool {
    a.attributes.len() == b.attributes.len()
        && a.attributes.iter().zip(&b.attributes).all(|(x, y)| {
            x.name == y.name
                && x.binding == y.binding
                && (!x.binding.is_geometry() || x.crs == y.crs)
        })
}

/// Source index of every target attribute.
fn index_map(from: &RecordSchema, to: &RecordSchema) -> Result<Vec<usize>> {
    to.attributes
        .iter()
        .map(|attr| {
            from.index_of(&attr.name).ok_or_else(|| {
                WfsError::schema(format!(
                    "Attribute '{}' is not present in the decoded records of {}",
                    attr.name, from.type_name
                ))
            })
        })
        .collect()
}

/// Tracks the `next()` contract: one end-of-stream, then errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Ended,
    Closed,
}

impl Phase {
    fn check(self) -> Result<()> {
        match self {
            Phase::Open => Ok(()),
            Phase::Ended => Err(WfsError::exhausted("next() after end of stream")),
            Phase::Closed => Err(WfsError::exhausted("next() on a closed cursor")),
        }
    }
}

/// A cursor with no records.
#[derive(Debug)]
pub struct EmptyCursor {
    schema: SchemaRef,
    phase: Phase,
}

impl EmptyCursor {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            phase: Phase::Open,
        }
    }
}

#[async_trait]
impl RecordCursor for EmptyCursor {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    async fn next(&mut self) -> Result<Option<Feature>> {
        self.phase.check()?;
        self.phase = Phase::Ended;
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.phase = Phase::Closed;
        Ok(())
    }
}

/// Aligns records to a target schema: attribute order and geometry CRS.
pub struct SchemaCoercion {
    inner: Box<dyn RecordCursor>,
    schema: SchemaRef,
    indices: Vec<usize>,
    /// Target CRS of each geometry attribute
    reprojections: Vec<Option<Crs>>,
    transform: Arc<dyn CrsTransform>,
    closed: bool,
}

impl std::fmt::Debug for SchemaCoercion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCoercion")
            .field("schema", &self.schema.type_name)
            .field("indices", &self.indices)
            .finish_non_exhaustive()
    }
}

impl SchemaCoercion {
    /// Wrap `inner` so it yields records of `target`.
    ///
    /// Returns `inner` unchanged when its schema already matches.
    pub async fn wrap(
        inner: Box<dyn RecordCursor>,
        target: SchemaRef,
        transform: Arc<dyn CrsTransform>,
    ) -> Result<Box<dyn RecordCursor>> {
        let source = inner.schema();
        if schemas_match(&source, &target) {
            return Ok(inner);
        }
        let indices = match index_map(&source, &target) {
            Ok(indices) => indices,
            Err(e) => return Err(abort(inner, e).await),
        };
        let reprojections = target
            .attributes
            .iter()
            .map(|attr| match (&attr.crs, attr.binding.is_geometry()) {
                (Some(crs), true) => Some(crs.clone()),
                _ => None,
            })
            .collect();
        tracing::debug!(
            type_name = %target.type_name,
            "Coercing decoded records to requested schema"
        );
        Ok(Box::new(Self {
            inner,
            schema: target,
            indices,
            reprojections,
            transform,
            closed: false,
        }))
    }

    fn coerce(&self, feature: Feature) -> Result<Feature> {
        let Feature { id, mut values } = feature;
        let mut out = Vec::with_capacity(self.indices.len());
        for (i, &src) in self.indices.iter().enumerate() {
            let value = values
                .get_mut(src)
                .map(std::mem::take)
                .unwrap_or(AttributeValue::Null);
            let value = match (value, &self.reprojections[i]) {
                (AttributeValue::Geometry(g), Some(target)) => {
                    AttributeValue::Geometry(self.reproject(g, target)?)
                }
                (value, _) => value,
            };
            out.push(value);
        }
        Ok(Feature::new(id, out))
    }

    fn reproject(&self, value: GeometryValue, target: &Crs) -> Result<GeometryValue> {
        match &value.crs {
            Some(from) if from != target => {
                let geometry = self
                    .transform
                    .transform_geometry(&value.geometry, from, target)?;
                Ok(GeometryValue::new(geometry, Some(target.clone())))
            }
            // Untagged geometries are taken to be in the target system
            None => Ok(GeometryValue::new(value.geometry, Some(target.clone()))),
            Some(_) => Ok(value),
        }
    }
}

#[async_trait]
impl RecordCursor for SchemaCoercion {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    async fn next(&mut self) -> Result<Option<Feature>> {
        match self.inner.next().await? {
            Some(feature) => self.coerce(feature).map(Some),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await
    }
}

/// Passes only records matching the locally evaluated filter part.
///
/// Evaluation sees the inner schema, which may carry attributes the caller
/// did not ask for; matching records are then projected to the output
/// schema.
pub struct LocalPredicateFilter {
    inner: Box<dyn RecordCursor>,
    filter: Filter,
    evaluated: SchemaRef,
    schema: SchemaRef,
    /// `None` when the output schema is the evaluated one
    projection: Option<Vec<usize>>,
    transform: Arc<dyn CrsTransform>,
    rejected: u64,
    closed: bool,
}

impl std::fmt::Debug for LocalPredicateFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPredicateFilter")
            .field("filter", &self.filter.to_string())
            .field("rejected", &self.rejected)
            .finish_non_exhaustive()
    }
}

impl LocalPredicateFilter {
    pub async fn wrap(
        inner: Box<dyn RecordCursor>,
        filter: Filter,
        output: SchemaRef,
        transform: Arc<dyn CrsTransform>,
    ) -> Result<Box<dyn RecordCursor>> {
        let evaluated = inner.schema();
        let projection = if schemas_match(&evaluated, &output) {
            None
        } else {
            match index_map(&evaluated, &output) {
                Ok(indices) => Some(indices),
                Err(e) => return Err(abort(inner, e).await),
            }
        };
        tracing::debug!(
            type_name = %output.type_name,
            filter = %filter,
            carried = evaluated.attributes.len().saturating_sub(output.attributes.len()),
            "Evaluating filter locally"
        );
        Ok(Box::new(Self {
            inner,
            filter,
            evaluated,
            schema: output,
            projection,
            transform,
            rejected: 0,
            closed: false,
        }))
    }
}

#[async_trait]
impl RecordCursor for LocalPredicateFilter {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    async fn next(&mut self) -> Result<Option<Feature>> {
        while let Some(feature) = self.inner.next().await? {
            if !evaluate(&self.filter, &feature, &self.evaluated, self.transform.as_ref()) {
                self.rejected += 1;
                continue;
            }
            return Ok(Some(match &self.projection {
                None => feature,
                Some(indices) => {
                    let Feature { id, mut values } = feature;
                    let values = indices
                        .iter()
                        .map(|&i| values.get_mut(i).map(std::mem::take).unwrap_or_default())
                        .collect();
                    Feature::new(id, values)
                }
            }));
        }
        tracing::debug!(rejected = self.rejected, "Local filter drained");
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await
    }
}

/// Yields at most `limit` records, closing the inner cursor as soon as the
/// last one has been handed out.
pub struct MaxCountTruncation {
    inner: Box<dyn RecordCursor>,
    schema: SchemaRef,
    limit: u64,
    yielded: u64,
    inner_closed: bool,
    phase: Phase,
}

impl std::fmt::Debug for MaxCountTruncation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxCountTruncation")
            .field("limit", &self.limit)
            .field("yielded", &self.yielded)
            .finish_non_exhaustive()
    }
}

impl MaxCountTruncation {
    pub fn wrap(inner: Box<dyn RecordCursor>, limit: u64) -> Box<dyn RecordCursor> {
        Box::new(Self {
            schema: inner.schema(),
            inner,
            limit,
            yielded: 0,
            inner_closed: false,
            phase: Phase::Open,
        })
    }

    async fn close_inner(&mut self) -> Result<()> {
        if self.inner_closed {
            return Ok(());
        }
        self.inner_closed = true;
        self.inner.close().await
    }
}

#[async_trait]
impl RecordCursor for MaxCountTruncation {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    async fn next(&mut self) -> Result<Option<Feature>> {
        self.phase.check()?;
        if self.yielded >= self.limit {
            self.close_inner().await?;
            self.phase = Phase::Ended;
            return Ok(None);
        }
        match self.inner.next().await? {
            Some(feature) => {
                self.yielded += 1;
                if self.yielded == self.limit {
                    tracing::debug!(limit = self.limit, "Feature limit reached");
                    self.close_inner().await?;
                }
                Ok(Some(feature))
            }
            None => {
                self.phase = Phase::Ended;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.phase = Phase::Closed;
        self.close_inner().await
    }
}

/// Drops the first `offset` features of the inner cursor.
pub struct OffsetSkip {
    inner: Box<dyn RecordCursor>,
    schema: SchemaRef,
    remaining: u64,
    phase: Phase,
}

impl std::fmt::Debug for OffsetSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetSkip")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl OffsetSkip {
    pub fn wrap(inner: Box<dyn RecordCursor>, offset: u64) -> Box<dyn RecordCursor> {
        Box::new(Self {
            schema: inner.schema(),
            inner,
            remaining: offset,
            phase: Phase::Open,
        })
    }
}

#[async_trait]
impl RecordCursor for OffsetSkip {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    async fn next(&mut self) -> Result<Option<Feature>> {
        self.phase.check()?;
        while self.remaining > 0 {
            match self.inner.next().await? {
                Some(_) => self.remaining -= 1,
                None => {
                    self.phase = Phase::Ended;
                    return Ok(None);
                }
            }
        }
        let next = self.inner.next().await?;
        if next.is_none() {
            self.phase = Phase::Ended;
        }
        Ok(next)
    }

    async fn close(&mut self) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        self.phase = Phase::Closed;
        self.inner.close().await
    }
}

/// Stack the decorators a request plan calls for over an opened response.
///
/// `evaluated` is the schema the local filter sees (wire attributes in the
/// target CRS); `output` is what the caller asked for.
pub async fn assemble(
    mut raw: GmlRecordCursor,
    plan: &RequestPlan,
    evaluated: SchemaRef,
    output: SchemaRef,
    transform: Arc<dyn CrsTransform>,
) -> Result<Box<dyn RecordCursor>> {
    if raw.is_exhausted() {
        raw.close().await?;
        tracing::debug!(type_name = %plan.type_name, "Empty response");
        return Ok(Box::new(EmptyCursor::new(output)));
    }

    let mut cursor: Box<dyn RecordCursor> = Box::new(raw);
    if plan.split.needs_local() {
        cursor = SchemaCoercion::wrap(cursor, evaluated, Arc::clone(&transform)).await?;
        cursor =
            LocalPredicateFilter::wrap(cursor, plan.split.local.clone(), output, transform).await?;
        if plan.offset > 0 {
            cursor = OffsetSkip::wrap(cursor, plan.offset);
        }
    } else {
        cursor = SchemaCoercion::wrap(cursor, output, transform).await?;
    }
    if let Some(limit) = plan.limit {
        cursor = MaxCountTruncation::wrap(cursor, limit);
    }
    Ok(cursor)
}
