//! Session configuration.
//!
//! Deserializable from the JSON a graph source stores, e.g.:
//!
//! ```json
//! {
//!   "capabilities_url": "https://maps.example.com/geoserver/wfs?SERVICE=WFS&REQUEST=GetCapabilities",
//!   "preferred_method": "post",
//!   "max_features": 10000,
//!   "auth": { "type": "basic", "username": "reader", "password": { "env_var": "WFS_PASSWORD" } }
//! }
//! ```

use crate::auth::AuthConfig;
use crate::error::{Result, WfsError};
use crate::transport::http::HttpTransportConfig;
use serde::{Deserialize, Serialize};

/// Which transport method `GetFeature` requests use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodPreference {
    /// GET when advertised, POST otherwise
    #[default]
    Auto,
    Get,
    Post,
}

/// WFS session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WfsConfig {
    /// `GetCapabilities` URL of the service
    pub capabilities_url: String,
    pub preferred_method: MethodPreference,
    /// Client-side hard limit on returned features; 0 means unlimited
    pub max_features: u64,
    /// Connect timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds (default: 60)
    pub request_timeout_secs: u64,
    /// Ask for gzip-compressed responses (default: true)
    pub gzip: bool,
    pub auth: AuthConfig,
}

impl Default for WfsConfig {
    fn default() -> Self {
        Self {
            capabilities_url: String::new(),
            preferred_method: MethodPreference::Auto,
            max_features: 0,
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
            gzip: true,
            auth: AuthConfig::None,
        }
    }
}

impl WfsConfig {
    pub fn new(capabilities_url: impl Into<String>) -> Self {
        Self {
            capabilities_url: capabilities_url.into(),
            ..Default::default()
        }
    }

    pub fn with_preferred_method(mut self, method: MethodPreference) -> Self {
        self.preferred_method = method;
        self
    }

    pub fn with_max_features(mut self, max_features: u64) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Check required fields.
    pub fn validate(&self) -> Result<()> {
        if self.capabilities_url.trim().is_empty() {
            return Err(WfsError::config("capabilities_url is required"));
        }
        if !self.capabilities_url.starts_with("http://")
            && !self.capabilities_url.starts_with("https://")
        {
            return Err(WfsError::config(format!(
                "capabilities_url must be an http(s) URL, got '{}'",
                self.capabilities_url
            )));
        }
        Ok(())
    }

    /// HTTP client settings derived from this config.
    pub fn http(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            connect_timeout_secs: self.connect_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
            gzip: self.gzip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_value::ConfigValue;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: WfsConfig =
            serde_json::from_str(r#"{"capabilities_url": "http://localhost/geoserver/wfs"}"#)
                .unwrap();
        assert_eq!(config.preferred_method, MethodPreference::Auto);
        assert_eq!(config.max_features, 0);
        assert_eq!(config.connect_timeout_secs, 30);
        assert!(config.gzip);
        assert!(matches!(config.auth, AuthConfig::None));
        config.validate().unwrap();
    }

    #[test]
    fn test_full_json() {
        let json = r#"{
            "capabilities_url": "https://maps.example.com/wfs",
            "preferred_method": "post",
            "max_features": 50,
            "request_timeout_secs": 5,
            "gzip": false,
            "auth": {"type": "basic", "username": "reader", "password": {"env_var": "WFS_TEST_PW", "default_val": "pw"}}
        }"#;
        let config: WfsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.preferred_method, MethodPreference::Post);
        assert_eq!(config.max_features, 50);
        assert_eq!(config.http().request_timeout_secs, 5);
        assert!(!config.http().gzip);
        match config.auth {
            AuthConfig::Basic { username, password } => {
                assert_eq!(username, ConfigValue::literal("reader"));
                assert_eq!(password.resolve().unwrap(), "pw");
            }
            other => panic!("unexpected auth: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_missing_url() {
        assert!(matches!(
            WfsConfig::default().validate(),
            Err(WfsError::Config(_))
        ));
        assert!(WfsConfig::new("ftp://x").validate().is_err());
    }
}
