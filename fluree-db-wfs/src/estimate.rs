//! Bounds and row-count estimates for unrestricted queries.
//!
//! Sources, cheapest first:
//!
//! 1. Bounds declared in the capabilities document
//! 2. A `resultType=hits` count request, when advertised
//! 3. One geometry-only scan through the full pipeline, which fills both
//!    the bounds and the count slot. The scan ignores the configured hard
//!    limit, since its result stands for the whole type.
//!
//! Results are cached per type for the life of the session. A scan only
//! populates the cache when it reaches the end of the stream.

use crate::crs::Envelope;
use crate::decode::{parse_hits, RecordCursor};
use crate::error::Result;
use crate::query::QueryDescriptor;
use crate::request::{choose_method, effective_limit};
use crate::schema::AttributeValue;
use crate::store::WfsDataStore;
use crate::transport::send_checked;
use std::collections::HashMap;
use std::sync::Mutex;

/// Cached aggregates of one feature type, in its native CRS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    /// `Some` once known; the inner value is `None` for a type without
    /// any geometry
    pub bounds: Option<Option<Envelope>>,
    pub count: Option<u64>,
}

/// Estimates aggregate bounds and counts, with a per-type cache.
#[derive(Debug, Default)]
pub struct BoundsAndCountEstimator {
    cache: Mutex<HashMap<String, Aggregates>>,
}

impl BoundsAndCountEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cache entry for `type_name`.
    pub fn cached(&self, type_name: &str) -> Aggregates {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(type_name).cloned())
            .unwrap_or_default()
    }

    fn update(&self, type_name: &str, f: impl FnOnce(&mut Aggregates)) {
        if let Ok(mut cache) = self.cache.lock() {
            f(cache.entry(type_name.to_string()).or_default());
        }
    }

    /// Bounding box of everything `query` would return.
    ///
    /// `None` for restricted queries and for types without geometries.
    pub async fn estimate_bounds(
        &self,
        store: &WfsDataStore,
        query: &QueryDescriptor,
    ) -> Result<Option<Envelope>> {
        if !query.filter.is_include() {
            return Ok(None);
        }
        let type_name = store
            .capabilities()
            .type_capability(query.require_type_name()?)?
            .name
            .clone();

        let bounds = match self.cached(&type_name).bounds {
            Some(bounds) => bounds,
            None => match store
                .capabilities()
                .bounds_in_native_crs(&type_name, store.transform())
            {
                Some(declared) => {
                    self.update(&type_name, |agg| agg.bounds = Some(Some(declared)));
                    Some(declared)
                }
                None => self.full_scan(store, &type_name).await?.bounds.flatten(),
            },
        };

        Ok(bounds.and_then(|env| self.to_target_crs(store, &type_name, env, query)))
    }

    /// Number of features `query` would return, clamped by its start index
    /// and limits.
    ///
    /// `None` for restricted queries.
    pub async fn estimate_count(
        &self,
        store: &WfsDataStore,
        query: &QueryDescriptor,
    ) -> Result<Option<u64>> {
        if !query.filter.is_include() {
            return Ok(None);
        }
        let type_name = store
            .capabilities()
            .type_capability(query.require_type_name()?)?
            .name
            .clone();

        let total = match self.cached(&type_name).count {
            Some(count) => count,
            None => match self.hits(store, &type_name).await {
                Some(count) => {
                    self.update(&type_name, |agg| agg.count = Some(count));
                    count
                }
                None => match self.full_scan(store, &type_name).await?.count {
                    Some(count) => count,
                    None => return Ok(None),
                },
            },
        };

        let remaining = total.saturating_sub(query.start_index);
        Ok(Some(
            match effective_limit(store.request_builder().hard_limit(), query.max_features) {
                Some(limit) => remaining.min(limit),
                None => remaining,
            },
        ))
    }

    /// Ask the server for a count. Advisory: any failure is `None`.
    async fn hits(&self, store: &WfsDataStore, type_name: &str) -> Option<u64> {
        let capabilities = store.capabilities();
        if !capabilities.supports_result_type_hits() {
            return None;
        }
        let result: Result<u64> = async {
            let method = choose_method(store.config().preferred_method, capabilities)?;
            let request = store.request_builder().build_hits(type_name, method)?;
            let response = send_checked(store.transport(), &request).await?;
            parse_hits(&response.into_bytes().await?)
        }
        .await;

        match result {
            Ok(count) => {
                tracing::debug!(type_name = %type_name, count, "Server reported feature count");
                Some(count)
            }
            Err(e) if e.is_advisory() => {
                tracing::debug!(type_name = %type_name, error = %e, "Count request declined");
                None
            }
            Err(e) => {
                tracing::warn!(
                    type_name = %type_name,
                    error = %e,
                    "Count request failed; falling back to a full scan"
                );
                None
            }
        }
    }

    /// Stream the default geometry of every feature once.
    async fn full_scan(&self, store: &WfsDataStore, type_name: &str) -> Result<Aggregates> {
        let schema = store.schema(type_name).await?;
        let mut query = QueryDescriptor::new(type_name);
        if let Some(geometry) = schema.default_geometry_attribute() {
            query = query.with_properties([geometry.name.clone()]);
        }

        let mut cursor = store.scan_features(&query).await?;
        let scanned = scan(cursor.as_mut()).await;
        let closed = cursor.close().await;
        let (count, bounds) = scanned?;
        closed?;

        // Without MAXFEATURES the server still stops at its own default
        if let Some(server_max) = store.capabilities().default_max_features() {
            if count >= server_max {
                tracing::warn!(
                    type_name = %type_name,
                    count,
                    server_max,
                    "Full scan may have been cut off by the server; not caching"
                );
                return Ok(Aggregates::default());
            }
        }

        tracing::info!(
            type_name = %type_name,
            count,
            has_bounds = bounds.is_some(),
            "Full scan complete"
        );
        let aggregates = Aggregates {
            bounds: Some(bounds),
            count: Some(count),
        };
        self.update(type_name, |agg| *agg = aggregates.clone());
        Ok(aggregates)
    }

    fn to_target_crs(
        &self,
        store: &WfsDataStore,
        type_name: &str,
        env: Envelope,
        query: &QueryDescriptor,
    ) -> Option<Envelope> {
        let native = store
            .capabilities()
            .type_capability(type_name)
            .ok()?
            .native_crs
            .as_ref();
        match (native, &query.target_crs) {
            (Some(native), Some(target)) if native != target => {
                match store.transform().transform_envelope(&env, native, target) {
                    Ok(env) => Some(env),
                    Err(e) => {
                        tracing::warn!(
                            type_name = %type_name,
                            error = %e,
                            "Could not reproject bounds to the target CRS"
                        );
                        None
                    }
                }
            }
            _ => Some(env),
        }
    }
}

async fn scan(cursor: &mut dyn RecordCursor) -> Result<(u64, Option<Envelope>)> {
    let mut count = 0u64;
    let mut bounds: Option<Envelope> = None;
    while let Some(feature) = cursor.next().await? {
        count += 1;
        for value in &feature.values {
            if let AttributeValue::Geometry(geometry) = value {
                if let Some(env) = geometry.envelope() {
                    bounds = Some(Envelope::expand(bounds, &env));
                }
            }
        }
    }
    Ok((count, bounds))
}
