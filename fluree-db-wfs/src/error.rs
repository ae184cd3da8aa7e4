//! Error types for WFS operations.

use thiserror::Error;

/// Errors from WFS operations.
#[derive(Debug, Error)]
pub enum WfsError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested feature type is not declared in the capabilities document
    #[error("Unknown feature type: {0}")]
    UnknownType(String),

    /// The service does not advertise the operation/method pair
    #[error("Operation {operation} via {method} is not supported by the service")]
    UnsupportedOperation { operation: String, method: String },

    /// Both queries name a type and the names differ
    #[error("Cannot merge queries over different types: {left} vs {right}")]
    TypeMismatch { left: String, right: String },

    /// Both queries carry a protocol version and the versions differ
    #[error("Cannot merge queries with different versions: {left} vs {right}")]
    VersionConflict { left: String, right: String },

    /// Predicate cannot be represented in the service's filter language
    #[error("Predicate encoding error: {0}")]
    PredicateEncoding(String),

    /// Spatial reference identifier cannot be encoded
    #[error("Reference system encoding error: {0}")]
    ReferenceSystemEncoding(String),

    /// Coordinate transformation failed
    #[error("Projection error: {0}")]
    Projection(String),

    /// Capabilities document does not have the expected root element
    #[error("Malformed capabilities document: {0}")]
    MalformedCapabilities(String),

    /// Capabilities document parsed to nothing usable
    #[error("Capabilities document declares no {0}")]
    EmptyCapabilities(String),

    /// The server answered with an exception report
    #[error("Service exception [{code}]: {message}")]
    ServiceException { code: String, message: String },

    /// HTTP-layer failure (non-success status, broken body)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Network IO failure, including connect/read timeouts
    #[error("IO error: {0}")]
    Io(String),

    /// `next()` called on a cursor that already reported end-of-stream
    #[error("Cursor exhausted: {0}")]
    CursorExhausted(String),

    /// XML that could not be read
    #[error("XML error: {0}")]
    Xml(String),

    /// Feature type schema could not be resolved or applied
    #[error("Schema error: {0}")]
    Schema(String),
}

impl WfsError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType(name.into())
    }

    pub fn unsupported(operation: impl std::fmt::Display, method: impl std::fmt::Display) -> Self {
        Self::UnsupportedOperation {
            operation: operation.to_string(),
            method: method.to_string(),
        }
    }

    pub fn predicate_encoding(msg: impl Into<String>) -> Self {
        Self::PredicateEncoding(msg.into())
    }

    pub fn reference_system(msg: impl Into<String>) -> Self {
        Self::ReferenceSystemEncoding(msg.into())
    }

    pub fn projection(msg: impl Into<String>) -> Self {
        Self::Projection(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedCapabilities(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::CursorExhausted(msg.into())
    }

    pub fn xml(msg: impl Into<String>) -> Self {
        Self::Xml(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Whether this error is an advisory-path failure that callers may
    /// degrade to "unknown" instead of propagating.
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            Self::Projection(_) | Self::UnsupportedOperation { .. } | Self::ServiceException { .. }
        )
    }
}

/// Result type for WFS operations.
pub type Result<T> = std::result::Result<T, WfsError>;

impl From<quick_xml::Error> for WfsError {
    fn from(err: quick_xml::Error) -> Self {
        WfsError::Xml(err.to_string())
    }
}

// Integration with reqwest errors
impl From<reqwest::Error> for WfsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WfsError::Io(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            WfsError::Io(format!("Connection error: {}", err))
        } else {
            WfsError::Transport(format!("HTTP error: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_display_names_operation_and_method() {
        let err = WfsError::unsupported("DescribeFeatureType", "POST");
        assert_eq!(
            err.to_string(),
            "Operation DescribeFeatureType via POST is not supported by the service"
        );
    }

    #[test]
    fn test_service_exception_display() {
        let err = WfsError::ServiceException {
            code: "InvalidParameterValue".to_string(),
            message: "Unknown type".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Service exception [InvalidParameterValue]: Unknown type"
        );
    }

    #[test]
    fn test_advisory_classification() {
        assert!(WfsError::projection("no transform").is_advisory());
        assert!(!WfsError::transport("500").is_advisory());
        assert!(!WfsError::unknown_type("Roads").is_advisory());
    }
}
