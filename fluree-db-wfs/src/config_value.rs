//! Secret-bearing configuration values.
//!
//! Credentials for a WFS endpoint are rarely written into config files
//! directly. A [`ConfigValue`] is either the literal value or a reference to
//! an environment variable, resolved once when the session is built.
//!
//! ```
//! use fluree_db_wfs::ConfigValue;
//!
//! let literal: ConfigValue = serde_json::from_str(r#""s3cret""#).unwrap();
//! assert_eq!(literal.resolve().unwrap(), "s3cret");
//!
//! let from_env: ConfigValue =
//!     serde_json::from_str(r#"{"env_var": "WFS_UNSET_PASSWORD", "default_val": "guest"}"#)
//!         .unwrap();
//! assert_eq!(from_env.resolve().unwrap(), "guest");
//! ```

use crate::error::{Result, WfsError};
use serde::{Deserialize, Serialize};

/// A literal string or an environment variable lookup with optional default.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfigValue {
    Literal(String),
    Env {
        env_var: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_val: Option<String>,
    },
}

impl ConfigValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn from_env(var_name: impl Into<String>) -> Self {
        Self::Env {
            env_var: var_name.into(),
            default_val: None,
        }
    }

    /// Resolve to the concrete string.
    ///
    /// # Errors
    ///
    /// `Config` when the variable is unset and there is no default.
    pub fn resolve(&self) -> Result<String> {
        match self {
            ConfigValue::Literal(value) => Ok(value.clone()),
            ConfigValue::Env {
                env_var,
                default_val,
            } => std::env::var(env_var)
                .ok()
                .or_else(|| default_val.clone())
                .ok_or_else(|| {
                    WfsError::config(format!(
                        "Environment variable '{}' not set and no default provided",
                        env_var
                    ))
                }),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Literal(s.to_string())
    }
}
