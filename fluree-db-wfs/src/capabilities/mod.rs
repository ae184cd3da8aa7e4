//! Parsed, read-only view of a WFS capabilities document.
//!
//! A [`CapabilitiesIndex`] is built once per session and shared behind an
//! `Arc`; it is never mutated. A session that needs fresh capabilities builds
//! a new index.
//!
//! "Operation not available" is an expected answer, not an exceptional one:
//! [`CapabilitiesIndex::supports`] returns a bool and
//! [`CapabilitiesIndex::operation_url`] a `Result` the caller can match on to
//! pick a fallback transport.

mod parse;

use crate::crs::{Crs, CrsTransform, Envelope};
use crate::error::{Result, WfsError};
use crate::request::kvp::{append_query, encode_value};
use crate::transport::TransportMethod;
use crate::WFS_VERSION;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// WFS operations the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    GetCapabilities,
    DescribeFeatureType,
    GetFeature,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetCapabilities => "GetCapabilities",
            Self::DescribeFeatureType => "DescribeFeatureType",
            Self::GetFeature => "GetFeature",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "GetCapabilities" => Some(Self::GetCapabilities),
            "DescribeFeatureType" => Some(Self::DescribeFeatureType),
            "GetFeature" => Some(Self::GetFeature),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one remote feature type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeCapability {
    pub name: String,
    pub title: String,
    pub abstract_text: String,
    pub keywords: BTreeSet<String>,
    /// `DefaultSRS`; `None` if the server did not declare one
    pub native_crs: Option<Crs>,
    /// `OtherSRS` entries
    pub other_crs: Vec<Crs>,
    /// Declared box, in [`TypeCapability::declared_bounds_crs`]
    pub declared_bounds: Option<Envelope>,
    pub declared_bounds_crs: Crs,
    /// Ready-to-send `DescribeFeatureType` URL for this type
    pub describe_schema_endpoint: Option<String>,
}

impl TypeCapability {
    /// Whether the server can answer in `crs` for this type.
    pub fn supports_crs(&self, crs: &Crs) -> bool {
        self.native_crs.as_ref() == Some(crs) || self.other_crs.contains(crs)
    }

    /// Part after the namespace prefix (`roads` for `topp:roads`).
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }
}

pub(crate) fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Queryable view of a capabilities document.
#[derive(Debug, Clone)]
pub struct CapabilitiesIndex {
    version: String,
    service_title: String,
    types: Vec<TypeCapability>,
    by_name: HashMap<String, usize>,
    operations: HashMap<(OperationKind, TransportMethod), String>,
    parameters: HashMap<(OperationKind, String), Vec<String>>,
    default_max_features: Option<u64>,
}

impl CapabilitiesIndex {
    /// Parse a capabilities document.
    ///
    /// # Errors
    ///
    /// - `MalformedCapabilities` when the root is not `WFS_Capabilities`
    /// - `ServiceException` when the root is an exception report
    /// - `EmptyCapabilities` when no feature type or no operation is declared
    pub fn build(document: &[u8]) -> Result<Self> {
        let parsed = parse::parse_capabilities(document)?;

        if parsed.types.is_empty() {
            return Err(WfsError::EmptyCapabilities("feature types".to_string()));
        }
        if parsed.operations.is_empty() {
            return Err(WfsError::EmptyCapabilities("operations".to_string()));
        }

        let mut operations = HashMap::new();
        for (kind, method, href) in parsed.operations {
            // First advertised endpoint wins
            operations.entry((kind, method)).or_insert(href);
        }

        let describe_base = operations
            .get(&(OperationKind::DescribeFeatureType, TransportMethod::Get))
            .cloned();

        let mut types = parsed.types;
        for ty in types.iter_mut() {
            ty.describe_schema_endpoint = match &describe_base {
                Some(base) => Some(append_query(
                    base,
                    &[
                        ("SERVICE", "WFS".to_string()),
                        ("VERSION", WFS_VERSION.to_string()),
                        ("REQUEST", OperationKind::DescribeFeatureType.as_str().to_string()),
                        ("TYPENAME", encode_value(&ty.name)),
                    ],
                )?),
                None => None,
            };
        }

        let by_name = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        tracing::debug!(
            types = types.len(),
            operations = operations.len(),
            version = %parsed.version,
            "Built capabilities index"
        );

        Ok(Self {
            version: parsed.version,
            service_title: parsed.service_title,
            types,
            by_name,
            operations,
            parameters: parsed.parameters,
            default_max_features: parsed.default_max_features,
        })
    }

    /// Protocol version the document declares.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn service_title(&self) -> &str {
        &self.service_title
    }

    /// Declared type names, in document order.
    pub fn type_names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }

    /// Endpoint for an operation/method pair.
    pub fn operation_url(&self, kind: OperationKind, method: TransportMethod) -> Result<&str> {
        self.operations
            .get(&(kind, method))
            .map(|s| s.as_str())
            .ok_or_else(|| WfsError::unsupported(kind, method))
    }

    pub fn supports(&self, kind: OperationKind, method: TransportMethod) -> bool {
        self.operations.contains_key(&(kind, method))
    }

    /// Look up a type by qualified name, or by local name when unambiguous.
    pub fn type_capability(&self, name: &str) -> Result<&TypeCapability> {
        if let Some(&i) = self.by_name.get(name) {
            return Ok(&self.types[i]);
        }
        let local = local_part(name);
        let mut candidates = self.types.iter().filter(|t| t.local_name() == local);
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Ok(only),
            _ => Err(WfsError::unknown_type(name)),
        }
    }

    /// Advertised values of an operation parameter (e.g. `outputFormat`).
    pub fn parameter_values(&self, kind: OperationKind, parameter: &str) -> &[String] {
        self.parameters
            .get(&(kind, parameter.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `GetFeature` accepts `resultType=hits`.
    pub fn supports_result_type_hits(&self) -> bool {
        self.parameter_values(OperationKind::GetFeature, "resultType")
            .iter()
            .any(|v| v.eq_ignore_ascii_case("hits"))
    }

    /// Server-declared `DefaultMaxFeatures` constraint.
    pub fn default_max_features(&self) -> Option<u64> {
        self.default_max_features
    }

    /// Declared bounds of `name`, transformed into the type's native CRS.
    ///
    /// The transform runs here rather than at build time so a failure is
    /// attributed to this lookup. Bounds are advisory: unknown types and
    /// failed transforms yield `None`.
    pub fn bounds_in_native_crs(
        &self,
        name: &str,
        transform: &dyn CrsTransform,
    ) -> Option<Envelope> {
        let ty = self.type_capability(name).ok()?;
        let declared = ty.declared_bounds?;
        let native = match &ty.native_crs {
            Some(crs) => crs,
            None => return Some(declared),
        };
        match transform.transform_envelope(&declared, &ty.declared_bounds_crs, native) {
            Ok(env) => Some(env),
            Err(e) => {
                tracing::warn!(
                    type_name = %name,
                    error = %e,
                    "Could not reproject declared bounds; treating as unknown"
                );
                None
            }
        }
    }
}
