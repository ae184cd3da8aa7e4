//! `GetFeature` request construction.
//!
//! A [`RequestBuilder`] turns a [`QueryDescriptor`] into a [`RequestPlan`]:
//! the encoded [`WireRequest`] plus everything the decoding pipeline needs
//! to compensate for what the server was not asked to do.
//!
//! Parameters are always emitted in the same order so identical queries
//! produce byte-identical requests.

pub mod kvp;
mod post;

use crate::capabilities::{CapabilitiesIndex, OperationKind};
use crate::config::MethodPreference;
use crate::crs::Crs;
use crate::error::{Result, WfsError};
use crate::filter::{split_filter, Filter, FilterEncoder, FilterSplit};
use crate::query::{PropertySelection, QueryDescriptor};
use crate::schema::RecordSchema;
use crate::transport::{TransportMethod, WireRequest};
use crate::WFS_VERSION;
use kvp::{append_query, encode_list, encode_value};

/// Pick the transport method for `GetFeature`.
///
/// The preferred method is used when advertised, otherwise the other one.
pub fn choose_method(
    preference: MethodPreference,
    capabilities: &CapabilitiesIndex,
) -> Result<TransportMethod> {
    let preferred = match preference {
        MethodPreference::Auto | MethodPreference::Get => TransportMethod::Get,
        MethodPreference::Post => TransportMethod::Post,
    };
    for method in [preferred, preferred.other()] {
        if capabilities.supports(OperationKind::GetFeature, method) {
            if method != preferred {
                tracing::debug!(
                    preferred = %preferred,
                    using = %method,
                    "Preferred GetFeature method not advertised"
                );
            }
            return Ok(method);
        }
    }
    Err(WfsError::unsupported(OperationKind::GetFeature, preferred))
}

/// Smaller of two limits where 0 means unlimited.
pub fn combine_hard_limits(configured: u64, server: Option<u64>) -> u64 {
    match (configured, server.unwrap_or(0)) {
        (0, s) => s,
        (c, 0) => c,
        (c, s) => c.min(s),
    }
}

/// Effective cap on delivered features: the hard limit clamped by the query.
pub fn effective_limit(hard_limit: u64, max_features: Option<u64>) -> Option<u64> {
    match (hard_limit, max_features) {
        (0, max) => max,
        (hard, Some(max)) => Some(hard.min(max)),
        (hard, None) => Some(hard),
    }
}

/// A built request and the compensation the pipeline must apply.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub request: WireRequest,
    pub type_name: String,
    /// Attributes the caller asked for, in order
    pub output_properties: Vec<String>,
    /// Attributes requested from the server: the output plus any the local
    /// filter reads
    pub wire_properties: Vec<String>,
    pub split: FilterSplit,
    /// Reference system geometries arrive in, when known
    pub response_crs: Option<Crs>,
    /// Reference system the caller wants geometries in
    pub target_crs: Option<Crs>,
    /// Records the pipeline skips after local filtering. Non-zero only when
    /// the start index could not be sent to the server.
    pub offset: u64,
    /// Cap on delivered features
    pub limit: Option<u64>,
}

/// Normalized request parameters shared by the KVP and XML encodings.
#[derive(Debug, Clone)]
pub(crate) struct GetFeatureParams {
    pub type_name: String,
    pub max_features: Option<u64>,
    pub start_index: u64,
    pub properties: Vec<String>,
    pub srs_name: Option<String>,
    pub server_filter: Filter,
    pub sort_by: Vec<crate::query::SortBy>,
    pub handle: Option<String>,
    pub hits: bool,
}

/// Builds `GetFeature` requests against one capabilities index.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder<'a> {
    capabilities: &'a CapabilitiesIndex,
    encoder: &'a dyn FilterEncoder,
    hard_limit: u64,
}

impl<'a> RequestBuilder<'a> {
    /// `hard_limit` is the configured ceiling; it is combined with the
    /// server's `DefaultMaxFeatures`.
    pub fn new(
        capabilities: &'a CapabilitiesIndex,
        encoder: &'a dyn FilterEncoder,
        hard_limit: u64,
    ) -> Self {
        Self {
            capabilities,
            encoder,
            hard_limit: combine_hard_limits(hard_limit, capabilities.default_max_features()),
        }
    }

    /// Combined hard limit; 0 means unlimited.
    pub fn hard_limit(&self) -> u64 {
        self.hard_limit
    }

    /// Drop the client-side hard limit. The server's own default still
    /// applies on its end.
    pub fn without_hard_limit(mut self) -> Self {
        self.hard_limit = 0;
        self
    }

    /// Build the request for `query`.
    ///
    /// `schema` is the full schema of the type; an `All` projection is
    /// expanded from it so the server always receives an explicit list.
    ///
    /// # Errors
    ///
    /// - `UnknownType` when the type is not advertised
    /// - `UnsupportedOperation` when `GetFeature` has no `method` endpoint
    /// - `Schema` when the projection names an unknown attribute
    /// - `ReferenceSystemEncoding` when the target CRS is neither offered
    ///   by the server nor reachable from a known native CRS
    /// - `PredicateEncoding` when the server part of the filter has no
    ///   wire form
    pub fn build_get_feature(
        &self,
        query: &QueryDescriptor,
        schema: &RecordSchema,
        method: TransportMethod,
    ) -> Result<RequestPlan> {
        let capability = self.capabilities.type_capability(query.require_type_name()?)?;
        let endpoint = self
            .capabilities
            .operation_url(OperationKind::GetFeature, method)?;

        let output_properties = match &query.properties {
            PropertySelection::All => schema.attribute_names().map(str::to_string).collect(),
            PropertySelection::Explicit(names) => {
                for name in names {
                    if schema.attribute(name).is_none() {
                        return Err(WfsError::schema(format!(
                            "Property '{}' not found in type {}",
                            name, capability.name
                        )));
                    }
                }
                names.clone()
            }
        };

        let split = split_filter(&query.filter);
        let mut wire_properties: Vec<String> = output_properties.clone();
        for name in split.local.referenced_properties() {
            if schema.attribute(&name).is_some() && !wire_properties.contains(&name) {
                wire_properties.push(name);
            }
        }

        let (srs_name, response_crs) = match &query.target_crs {
            Some(target) if capability.supports_crs(target) => {
                (Some(target.to_srs_name()), Some(target.clone()))
            }
            Some(target) => match &capability.native_crs {
                Some(native) => {
                    tracing::debug!(
                        type_name = %capability.name,
                        target = %target,
                        native = %native,
                        "Target CRS not offered by server; reprojecting locally"
                    );
                    (None, Some(native.clone()))
                }
                None => {
                    return Err(WfsError::reference_system(format!(
                        "{} is not offered for {} and its native CRS is unknown",
                        target, capability.name
                    )))
                }
            },
            None => (None, capability.native_crs.clone()),
        };

        let limit = effective_limit(self.hard_limit, query.max_features);
        // Server-side paging counts raw rows, not rows passing the local filter
        let (wire_max, wire_start, offset) = if split.needs_local() {
            (None, 0, query.start_index)
        } else {
            (limit, query.start_index, 0)
        };

        let params = GetFeatureParams {
            type_name: capability.name.clone(),
            max_features: wire_max,
            start_index: wire_start,
            properties: wire_properties.clone(),
            srs_name,
            server_filter: split.server.clone(),
            sort_by: query.sort_by.clone(),
            handle: query.handle.clone(),
            hits: false,
        };
        let request = self.encode(endpoint, method, &params)?;

        Ok(RequestPlan {
            request,
            type_name: capability.name.clone(),
            output_properties,
            wire_properties,
            split,
            response_crs,
            target_crs: query.target_crs.clone(),
            offset,
            limit,
        })
    }

    /// Count-only (`resultType=hits`) request for a whole type.
    pub fn build_hits(&self, type_name: &str, method: TransportMethod) -> Result<WireRequest> {
        let capability = self.capabilities.type_capability(type_name)?;
        let endpoint = self
            .capabilities
            .operation_url(OperationKind::GetFeature, method)?;
        let params = GetFeatureParams {
            type_name: capability.name.clone(),
            max_features: None,
            start_index: 0,
            properties: Vec::new(),
            srs_name: None,
            server_filter: Filter::Include,
            sort_by: Vec::new(),
            handle: None,
            hits: true,
        };
        self.encode(endpoint, method, &params)
    }

    fn encode(
        &self,
        endpoint: &str,
        method: TransportMethod,
        params: &GetFeatureParams,
    ) -> Result<WireRequest> {
        let request = match method {
            TransportMethod::Get => WireRequest::get(self.kvp_url(endpoint, params)?),
            TransportMethod::Post => {
                WireRequest::post(endpoint, post::get_feature_body(params, self.encoder)?)
            }
        };
        tracing::debug!(
            type_name = %params.type_name,
            method = %method,
            url = %request.url,
            "Built GetFeature request"
        );
        Ok(request)
    }

    fn kvp_url(&self, endpoint: &str, params: &GetFeatureParams) -> Result<String> {
        let mut pairs: Vec<(&str, String)> = vec![
            ("SERVICE", "WFS".to_string()),
            ("VERSION", WFS_VERSION.to_string()),
            ("REQUEST", OperationKind::GetFeature.as_str().to_string()),
            ("TYPENAME", encode_value(&params.type_name)),
        ];
        if let Some(max) = params.max_features {
            pairs.push(("MAXFEATURES", max.to_string()));
        }
        if params.start_index > 0 {
            pairs.push(("STARTINDEX", params.start_index.to_string()));
        }
        if !params.properties.is_empty() {
            pairs.push(("PROPERTYNAME", encode_list(&params.properties)));
        }
        if let Some(srs) = &params.srs_name {
            pairs.push(("SRSNAME", encode_value(srs)));
        }
        match &params.server_filter {
            Filter::Include => {}
            Filter::Id(ids) => {
                let ids: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
                pairs.push(("FEATUREID", encode_list(&ids)));
            }
            other => pairs.push(("FILTER", encode_value(&self.encoder.encode(other)?))),
        }
        if !params.sort_by.is_empty() {
            let tokens: Vec<String> = params.sort_by.iter().map(|s| s.to_string()).collect();
            pairs.push(("SORTBY", encode_list(&tokens)));
        }
        if params.hits {
            pairs.push(("RESULTTYPE", "hits".to_string()));
        }
        append_query(endpoint, &pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::tests::CAPABILITIES;
    use crate::crs::Envelope;
    use crate::filter::OgcFilterEncoder;
    use crate::query::SortBy;
    use crate::schema::{AttributeDescriptor, AttributeType, GeometryKind};

    fn caps() -> CapabilitiesIndex {
        CapabilitiesIndex::build(CAPABILITIES.as_bytes()).unwrap()
    }

    fn roads_schema() -> RecordSchema {
        RecordSchema::new(
            "topp:roads",
            vec![
                AttributeDescriptor::geometry(
                    "the_geom",
                    GeometryKind::MultiLineString,
                    Some(Crs::epsg(3857)),
                ),
                AttributeDescriptor::new("name", AttributeType::String),
                AttributeDescriptor::new("lanes", AttributeType::Integer),
            ],
        )
    }

    #[test]
    fn test_combine_limits() {
        assert_eq!(combine_hard_limits(0, None), 0);
        assert_eq!(combine_hard_limits(0, Some(500)), 500);
        assert_eq!(combine_hard_limits(50, Some(500)), 50);
        assert_eq!(combine_hard_limits(50, None), 50);
        assert_eq!(effective_limit(0, None), None);
        assert_eq!(effective_limit(50, Some(1000)), Some(50));
        assert_eq!(effective_limit(50, Some(10)), Some(10));
        assert_eq!(effective_limit(0, Some(10)), Some(10));
    }

    #[test]
    fn test_kvp_all_properties_expanded() {
        let caps = caps();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 0);
        let plan = builder
            .build_get_feature(
                &QueryDescriptor::new("topp:roads"),
                &roads_schema(),
                TransportMethod::Get,
            )
            .unwrap();
        assert_eq!(
            plan.request.url,
            "http://localhost/geoserver/wfs?SERVICE=WFS&VERSION=1.1.0&REQUEST=GetFeature\
             &TYPENAME=topp%3Aroads&MAXFEATURES=500&PROPERTYNAME=the_geom,name,lanes"
        );
        assert_eq!(plan.limit, Some(500));
        assert_eq!(plan.response_crs, Some(Crs::epsg(3857)));
    }

    #[test]
    fn test_kvp_full_parameter_order() {
        let caps = caps();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 50);
        let query = QueryDescriptor::new("topp:roads")
            .with_properties(["name"])
            .with_max_features(1000)
            .with_start_index(20)
            .with_target_crs(Crs::epsg(4326))
            .with_sort_by(SortBy::asc("name"))
            .with_sort_by(SortBy::desc("lanes"));
        let plan = builder
            .build_get_feature(&query, &roads_schema(), TransportMethod::Get)
            .unwrap();
        assert_eq!(
            plan.request.url,
            "http://localhost/geoserver/wfs?SERVICE=WFS&VERSION=1.1.0&REQUEST=GetFeature\
             &TYPENAME=topp%3Aroads&MAXFEATURES=50&STARTINDEX=20&PROPERTYNAME=name\
             &SRSNAME=EPSG%3A4326&SORTBY=name%20A,lanes%20D"
        );
        assert_eq!(plan.limit, Some(50));
        assert_eq!(plan.offset, 0);
    }

    #[test]
    fn test_identifier_filter_uses_featureid() {
        let caps = caps();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 0);
        let query = QueryDescriptor::new("topp:roads")
            .with_properties(["name"])
            .with_filter(Filter::ids(["roads.2", "roads.1"]));
        let plan = builder
            .build_get_feature(&query, &roads_schema(), TransportMethod::Get)
            .unwrap();
        assert!(plan.request.url.ends_with("&FEATUREID=roads.1,roads.2"));
        assert!(!plan.request.url.contains("FILTER="));
    }

    #[test]
    fn test_split_filter_carries_local_properties() {
        let caps = caps();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 0);
        let bbox = Filter::bbox("the_geom", Envelope::new(0.0, 0.0, 1.0, 1.0), None);
        let query = QueryDescriptor::new("topp:roads")
            .with_properties(["name"])
            .with_max_features(10)
            .with_start_index(3)
            .with_filter(Filter::and(vec![bbox.clone(), Filter::gt("lanes", 2)]));
        let plan = builder
            .build_get_feature(&query, &roads_schema(), TransportMethod::Get)
            .unwrap();

        assert_eq!(plan.split.server, bbox);
        assert_eq!(plan.split.local, Filter::gt("lanes", 2));
        assert_eq!(plan.output_properties, vec!["name".to_string()]);
        assert_eq!(
            plan.wire_properties,
            vec!["name".to_string(), "lanes".to_string()]
        );
        let url = &plan.request.url;
        assert!(url.contains("FILTER=%3Cogc%3AFilter"));
        assert!(url.contains("BBOX"));
        assert!(!url.contains("PropertyIsGreaterThan"));
        assert!(!url.contains("MAXFEATURES"));
        assert!(!url.contains("STARTINDEX"));
        assert_eq!(plan.limit, Some(10));
        assert_eq!(plan.offset, 3);
    }

    #[test]
    fn test_unoffered_crs_falls_back_to_native() {
        let caps = caps();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 0);
        let query = QueryDescriptor::new("topp:roads").with_target_crs(Crs::epsg(27700));
        let plan = builder
            .build_get_feature(&query, &roads_schema(), TransportMethod::Get)
            .unwrap();
        assert!(!plan.request.url.contains("SRSNAME"));
        assert_eq!(plan.response_crs, Some(Crs::epsg(3857)));
        assert_eq!(plan.target_crs, Some(Crs::epsg(27700)));
    }

    #[test]
    fn test_errors() {
        let caps = caps();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 0);
        let schema = roads_schema();

        let unknown = QueryDescriptor::new("topp:lakes");
        assert!(matches!(
            builder.build_get_feature(&unknown, &schema, TransportMethod::Get),
            Err(WfsError::UnknownType(_))
        ));

        let bad_prop = QueryDescriptor::new("topp:roads").with_properties(["width"]);
        assert!(matches!(
            builder.build_get_feature(&bad_prop, &schema, TransportMethod::Get),
            Err(WfsError::Schema(_))
        ));

        let exclude = QueryDescriptor::new("topp:roads").with_filter(Filter::Exclude);
        assert!(matches!(
            builder.build_get_feature(&exclude, &schema, TransportMethod::Get),
            Err(WfsError::PredicateEncoding(_))
        ));
    }

    #[test]
    fn test_hits_request() {
        let caps = caps();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 0);
        let request = builder.build_hits("roads", TransportMethod::Get).unwrap();
        assert_eq!(
            request.url,
            "http://localhost/geoserver/wfs?SERVICE=WFS&VERSION=1.1.0&REQUEST=GetFeature\
             &TYPENAME=topp%3Aroads&RESULTTYPE=hits"
        );
    }

    #[test]
    fn test_choose_method() {
        let caps = caps();
        assert_eq!(
            choose_method(MethodPreference::Auto, &caps).unwrap(),
            TransportMethod::Get
        );
        assert_eq!(
            choose_method(MethodPreference::Post, &caps).unwrap(),
            TransportMethod::Post
        );

        let get_only = CAPABILITIES.replace(
            r#"<ows:Post xlink:href="http://localhost/geoserver/wfs"/>"#,
            "",
        );
        let caps = CapabilitiesIndex::build(get_only.as_bytes()).unwrap();
        assert_eq!(
            choose_method(MethodPreference::Post, &caps).unwrap(),
            TransportMethod::Get
        );
    }
}
