//! reqwest-backed transport.

use crate::auth::ServiceAuth;
use crate::error::{Result, WfsError};
use crate::transport::{Transport, TransportMethod, TransportResponse, WireRequest};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Connect timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds (default: 60)
    pub request_timeout_secs: u64,
    /// Ask for gzip-compressed responses (default: true)
    pub gzip: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
            gzip: true,
        }
    }
}

/// Transport over reqwest.
pub struct HttpTransport {
    auth: Arc<dyn ServiceAuth>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("auth", &self.auth)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig, auth: Arc<dyn ServiceAuth>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(config.gzip)
            .build()
            .map_err(|e| WfsError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { auth, http_client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// Send once. Error statuses, 401 included, go back to the caller.
    async fn send(&self, request: &WireRequest) -> Result<TransportResponse> {
        let mut builder = match request.method {
            TransportMethod::Get => self.http_client.get(&request.url),
            TransportMethod::Post => self
                .http_client
                .post(&request.url)
                .header("Content-Type", "text/xml")
                .body(request.body.clone().unwrap_or_default()),
        };

        if let Some(auth_header) = self.auth.authorization_header().await? {
            builder = builder.header("Authorization", auth_header);
        }

        let response = builder.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes_stream().map_err(WfsError::from).boxed();

        Ok(TransportResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
