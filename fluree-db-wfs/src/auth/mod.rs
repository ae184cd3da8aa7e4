//! Authentication for WFS endpoints.
//!
//! GeoServer, MapServer and deegree deployments commonly sit behind HTTP
//! Basic auth or a reverse proxy that accepts bearer tokens. Providers
//! produce the `Authorization` header value. A 401 is returned to the caller
//! as is; requests are never resent.

use crate::config_value::ConfigValue;
use crate::error::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Authentication provider for WFS requests.
#[async_trait]
pub trait ServiceAuth: Debug + Send + Sync {
    /// Current `Authorization` header value, or `None` when anonymous.
    async fn authorization_header(&self) -> Result<Option<String>>;
}

/// Configuration for endpoint authentication.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    /// HTTP Basic credentials
    Basic {
        username: ConfigValue,
        password: ConfigValue,
    },
    /// Static bearer token
    Bearer { token: ConfigValue },
}

impl AuthConfig {
    /// Resolve secrets and build the provider.
    pub fn create_provider(&self) -> Result<Arc<dyn ServiceAuth>> {
        match self {
            AuthConfig::None => Ok(Arc::new(NoAuth)),
            AuthConfig::Basic { username, password } => Ok(Arc::new(BasicAuth::new(
                &username.resolve()?,
                &password.resolve()?,
            ))),
            AuthConfig::Bearer { token } => Ok(Arc::new(BearerTokenAuth::new(token.resolve()?))),
        }
    }
}

/// Anonymous access.
#[derive(Debug)]
pub struct NoAuth;

#[async_trait]
impl ServiceAuth for NoAuth {
    async fn authorization_header(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// HTTP Basic authentication. The header is encoded once at construction.
pub struct BasicAuth {
    header: String,
}

impl Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth").finish_non_exhaustive()
    }
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        let raw = format!("{}:{}", username, password);
        Self {
            header: format!("Basic {}", STANDARD.encode(raw)),
        }
    }
}

#[async_trait]
impl ServiceAuth for BasicAuth {
    async fn authorization_header(&self) -> Result<Option<String>> {
        Ok(Some(self.header.clone()))
    }
}

/// Static bearer token authentication.
#[derive(Debug)]
pub struct BearerTokenAuth {
    token: String,
}

impl BearerTokenAuth {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl ServiceAuth for BearerTokenAuth {
    async fn authorization_header(&self) -> Result<Option<String>> {
        Ok(Some(format!("Bearer {}", self.token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_auth() {
        let json = r#"{"type": "basic", "username": "admin", "password": {"env_var": "WFS_UNSET_PW", "default_val": "geoserver"}}"#;
        let config: AuthConfig = serde_json::from_str(json).unwrap();
        match config {
            AuthConfig::Basic { username, password } => {
                assert_eq!(username.resolve().unwrap(), "admin");
                assert_eq!(password.resolve().unwrap(), "geoserver");
            }
            _ => panic!("Expected basic auth"),
        }
    }

    #[test]
    fn test_parse_none_auth() {
        let config: AuthConfig = serde_json::from_str(r#"{"type": "none"}"#).unwrap();
        assert!(matches!(config, AuthConfig::None));
    }

    #[tokio::test]
    async fn test_basic_header() {
        let auth = BasicAuth::new("admin", "geoserver");
        let header = auth.authorization_header().await.unwrap();
        assert_eq!(header.as_deref(), Some("Basic YWRtaW46Z2Vvc2VydmVy"));
    }

    #[tokio::test]
    async fn test_bearer_header() {
        let auth = BearerTokenAuth::new("t0k3n".to_string());
        let header = auth.authorization_header().await.unwrap();
        assert_eq!(header.as_deref(), Some("Bearer t0k3n"));
    }
}
