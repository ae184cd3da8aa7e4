//! WFS session: one capabilities index, one schema cache, many queries.

use crate::capabilities::CapabilitiesIndex;
use crate::config::WfsConfig;
use crate::crs::{CrsTransform, Envelope, StandardTransform};
use crate::decode::{collect_features, GmlRecordCursor, RecordCursor};
use crate::error::Result;
use crate::estimate::BoundsAndCountEstimator;
use crate::filter::{FilterEncoder, OgcFilterEncoder};
use crate::pipeline::{assemble, EmptyCursor};
use crate::query::{PropertySelection, QueryDescriptor};
use crate::request::{choose_method, RequestBuilder, RequestPlan};
use crate::schema::cache::SchemaCache;
use crate::schema::resolver::{DescribeFeatureTypeResolver, SchemaResolver};
use crate::schema::{Feature, RecordSchema, SchemaRef};
use crate::transport::{send_checked, HttpTransport, Transport, WireRequest};
use std::sync::Arc;

/// A connected WFS service.
///
/// Shared state (capabilities, schemas, aggregate estimates) lives here and
/// outlives individual queries; cursors are handed out per query.
#[derive(Debug)]
pub struct WfsDataStore {
    config: WfsConfig,
    transport: Arc<dyn Transport>,
    capabilities: Arc<CapabilitiesIndex>,
    schemas: SchemaCache,
    transform: Arc<dyn CrsTransform>,
    encoder: Arc<dyn FilterEncoder>,
    estimator: BoundsAndCountEstimator,
}

impl WfsDataStore {
    /// Fetch and index the service's capabilities.
    pub async fn connect(
        config: WfsConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn SchemaResolver>,
        transform: Arc<dyn CrsTransform>,
    ) -> Result<Self> {
        config.validate()?;
        let request = WireRequest::get(config.capabilities_url.clone());
        let response = send_checked(transport.as_ref(), &request).await?;
        let capabilities = CapabilitiesIndex::build(&response.into_bytes().await?)?;

        tracing::info!(
            url = %config.capabilities_url,
            service = %capabilities.service_title(),
            version = %capabilities.version(),
            types = capabilities.type_names().len(),
            "Connected to WFS service"
        );
        Ok(Self::from_capabilities(
            config,
            capabilities,
            transport,
            resolver,
            transform,
        ))
    }

    /// Connect over HTTP with `DescribeFeatureType` schemas and the built-in
    /// transforms.
    pub async fn connect_http(config: WfsConfig) -> Result<Self> {
        config.validate()?;
        let auth = config.auth.create_provider()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.http(), auth)?);
        let resolver = Arc::new(DescribeFeatureTypeResolver::new(Arc::clone(&transport)));
        Self::connect(config, transport, resolver, Arc::new(StandardTransform)).await
    }

    /// Build a session over an index that was already fetched.
    pub fn from_capabilities(
        config: WfsConfig,
        capabilities: CapabilitiesIndex,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn SchemaResolver>,
        transform: Arc<dyn CrsTransform>,
    ) -> Self {
        Self {
            config,
            transport,
            capabilities: Arc::new(capabilities),
            schemas: SchemaCache::new(resolver),
            transform,
            encoder: Arc::new(OgcFilterEncoder),
            estimator: BoundsAndCountEstimator::new(),
        }
    }

    /// Replace the predicate encoder used for server-side filters.
    pub fn with_filter_encoder(mut self, encoder: Arc<dyn FilterEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &WfsConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &CapabilitiesIndex {
        &self.capabilities
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.capabilities.type_names()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn transform(&self) -> &dyn CrsTransform {
        self.transform.as_ref()
    }

    pub fn request_builder(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(
            &self.capabilities,
            self.encoder.as_ref(),
            self.config.max_features,
        )
    }

    /// Full schema of `type_name`, resolved once per session.
    pub async fn schema(&self, type_name: &str) -> Result<SchemaRef> {
        let capability = self.capabilities.type_capability(type_name)?;
        self.schemas.get(capability).await
    }

    /// The request `get_features` would send, for inspection.
    pub async fn build_request(&self, query: &QueryDescriptor) -> Result<RequestPlan> {
        let full = self.schema(query.require_type_name()?).await?;
        let method = choose_method(self.config.preferred_method, &self.capabilities)?;
        self.request_builder().build_get_feature(query, &full, method)
    }

    /// Run `query` and return a cursor over exactly the features it selects.
    pub async fn get_features(&self, query: &QueryDescriptor) -> Result<Box<dyn RecordCursor>> {
        self.open_features(query, self.request_builder()).await
    }

    /// Like [`WfsDataStore::get_features`], ignoring the configured hard
    /// limit. Used by whole-type scans whose result is cached as a total.
    pub(crate) async fn scan_features(
        &self,
        query: &QueryDescriptor,
    ) -> Result<Box<dyn RecordCursor>> {
        self.open_features(query, self.request_builder().without_hard_limit())
            .await
    }

    async fn open_features(
        &self,
        query: &QueryDescriptor,
        builder: RequestBuilder<'_>,
    ) -> Result<Box<dyn RecordCursor>> {
        let type_name = query.require_type_name()?;
        let capability = self.capabilities.type_capability(type_name)?;

        if query.filter.is_exclude() {
            tracing::debug!(
                type_name = %capability.name,
                "Filter excludes everything; not querying"
            );
            // Resolving the schema may still send DescribeFeatureType on a
            // cold cache; no GetFeature is ever sent
            let full = self.schemas.get(capability).await?;
            let output = output_schema(&full, &query.properties, query.target_crs.as_ref())?;
            return Ok(Box::new(EmptyCursor::new(Arc::new(output))));
        }

        let full = self.schemas.get(capability).await?;
        let method = choose_method(self.config.preferred_method, &self.capabilities)?;
        let plan = builder.build_get_feature(query, &full, method)?;

        let projected = full.project(&plan.wire_properties)?;
        let wire = match &plan.response_crs {
            Some(crs) => projected.with_geometry_crs(crs),
            None => projected,
        };
        let evaluated = match &plan.target_crs {
            Some(crs) => wire.with_geometry_crs(crs),
            None => wire.clone(),
        };
        let output = output_schema(
            &full,
            &PropertySelection::Explicit(plan.output_properties.clone()),
            plan.target_crs.as_ref(),
        )?;

        let response = send_checked(self.transport.as_ref(), &plan.request).await?;
        let raw =
            GmlRecordCursor::open(response.body, capability.local_name(), Arc::new(wire)).await?;
        tracing::debug!(
            type_name = %capability.name,
            announced = ?raw.number_of_features(),
            local_filter = plan.split.needs_local(),
            limit = ?plan.limit,
            "Opened GetFeature response"
        );

        assemble(
            raw,
            &plan,
            Arc::new(evaluated),
            Arc::new(output),
            Arc::clone(&self.transform),
        )
        .await
    }

    /// Run `query` and drain every feature.
    pub async fn collect_features(&self, query: &QueryDescriptor) -> Result<Vec<Feature>> {
        let mut cursor = self.get_features(query).await?;
        collect_features(cursor.as_mut()).await
    }

    pub async fn estimate_bounds(&self, query: &QueryDescriptor) -> Result<Option<Envelope>> {
        self.estimator.estimate_bounds(self, query).await
    }

    pub async fn estimate_count(&self, query: &QueryDescriptor) -> Result<Option<u64>> {
        self.estimator.estimate_count(self, query).await
    }
}

/// The schema a caller sees: the projection, geometries in `target` when set.
fn output_schema(
    full: &RecordSchema,
    properties: &PropertySelection,
    target: Option<&crate::crs::Crs>,
) -> Result<RecordSchema> {
    let projected = match properties {
        PropertySelection::All => full.clone(),
        PropertySelection::Explicit(names) => full.project(names)?,
    };
    Ok(match target {
        Some(crs) => projected.with_geometry_crs(crs),
        None => projected,
    })
}
