//! OGC Web Feature Service (WFS 1.1) query pipeline for Fluree DB graph sources.
//!
//! Turns a [`QueryDescriptor`] into a `GetFeature` request, streams the GML
//! response as features, and compensates locally for whatever the server
//! was not asked to do.
//!
//! # Architecture
//!
//! - [`capabilities`] - `GetCapabilities` parsing into a read-only index
//! - [`query`] - query descriptors and their merge rules
//! - [`filter`] - predicate tree, server/local split, OGC Filter encoding
//! - [`request`] - KVP and XML `GetFeature` construction
//! - [`decode`] - streaming GML decoding into [`RecordCursor`]s
//! - [`pipeline`] - cursor decorators (coercion, local filter, truncation)
//! - [`estimate`] - bounds and count estimates with a per-type cache
//! - [`schema`] - record schemas, `DescribeFeatureType`, schema cache
//! - [`transport`] - HTTP and in-memory transports
//! - [`store`] - the session tying it together
//!
//! # Example
//!
//! ```ignore
//! use fluree_db_wfs::{Filter, QueryDescriptor, WfsConfig, WfsDataStore};
//!
//! let config = WfsConfig::new("https://maps.example.com/geoserver/wfs?SERVICE=WFS&REQUEST=GetCapabilities")
//!     .with_max_features(10_000);
//! let store = WfsDataStore::connect_http(config).await?;
//!
//! let query = QueryDescriptor::new("topp:roads")
//!     .with_properties(["name", "the_geom"])
//!     .with_filter(Filter::gt("lanes", 2))
//!     .with_max_features(100);
//! let features = store.collect_features(&query).await?;
//! ```

pub mod auth;
pub mod capabilities;
pub mod config;
pub mod config_value;
pub mod crs;
pub mod decode;
pub mod error;
pub mod estimate;
pub mod filter;
pub mod pipeline;
pub mod query;
pub mod request;
pub mod schema;
pub mod store;
pub mod transport;

/// Protocol version spoken on the wire.
pub const WFS_VERSION: &str = "1.1.0";

pub use capabilities::{CapabilitiesIndex, OperationKind, TypeCapability};
pub use config::{MethodPreference, WfsConfig};
pub use config_value::ConfigValue;
pub use crs::{Crs, CrsTransform, Envelope, StandardTransform};
pub use decode::{collect_features, RecordCursor};
pub use error::{Result, WfsError};
pub use filter::{ComparisonOp, Filter, FilterEncoder, Literal, OgcFilterEncoder};
pub use query::{merge, PropertySelection, QueryDescriptor, SortBy, SortOrder};
pub use request::{RequestBuilder, RequestPlan};
pub use schema::{
    AttributeDescriptor, AttributeType, AttributeValue, Feature, GeometryKind, GeometryValue,
    RecordSchema, SchemaRef,
};
pub use store::WfsDataStore;
pub use transport::{MemoryTransport, Transport, TransportMethod, WireRequest};
