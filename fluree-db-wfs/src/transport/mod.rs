//! Transport seam between the query pipeline and the network.
//!
//! - [`Transport`] - sends one [`WireRequest`] and returns status plus a body stream
//! - [`http`] - reqwest-backed implementation with auth and timeouts
//! - [`memory`] - canned responses for tests and offline use
//!
//! The pipeline treats any non-success status as [`WfsError::Transport`] and
//! never retries on its own.

pub mod http;
pub mod memory;

pub use http::HttpTransport;
pub use memory::MemoryTransport;

use crate::error::{Result, WfsError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;

/// Streamed response body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// HTTP method used to reach an operation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMethod {
    /// Key-value-pair encoded URL
    Get,
    /// XML request body
    Post,
}

impl TransportMethod {
    pub fn other(&self) -> Self {
        match self {
            Self::Get => Self::Post,
            Self::Post => Self::Get,
        }
    }
}

impl fmt::Display for TransportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A fully encoded request, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub method: TransportMethod,
    pub url: String,
    /// XML body for POST requests
    pub body: Option<String>,
}

impl WireRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: TransportMethod::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: TransportMethod::Post,
            url: url.into(),
            body: Some(body.into()),
        }
    }
}

/// Status metadata plus the unread body.
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Upper bound on how much of an error body is quoted in the error message.
const ERROR_BODY_PREVIEW: usize = 512;

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Pass successful responses through; turn anything else into `Transport`.
    pub async fn ensure_success(self, url: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let status = self.status;
        let body = self.into_bytes().await.unwrap_or_default();
        let preview = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_PREVIEW)]);
        Err(WfsError::transport(format!(
            "Request to {} failed ({}): {}",
            url, status, preview
        )))
    }

    /// Drain the whole body. Only for small documents (capabilities, schemas).
    pub async fn into_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// Sends wire requests.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    async fn send(&self, request: &WireRequest) -> Result<TransportResponse>;
}

/// Send a request and fail on non-success status.
pub(crate) async fn send_checked(
    transport: &dyn Transport,
    request: &WireRequest,
) -> Result<TransportResponse> {
    tracing::debug!(method = %request.method, url = %request.url, "Sending WFS request");
    transport
        .send(request)
        .await?
        .ensure_success(&request.url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static str) -> TransportResponse {
        TransportResponse {
            status,
            content_type: None,
            body: futures::stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))]).boxed(),
        }
    }

    #[tokio::test]
    async fn test_ensure_success_passes_2xx() {
        let resp = response(200, "ok").ensure_success("http://x").await.unwrap();
        assert_eq!(resp.into_bytes().await.unwrap(), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn test_ensure_success_quotes_body() {
        let err = response(503, "maintenance")
            .ensure_success("http://x/wfs")
            .await
            .unwrap_err();
        match err {
            WfsError::Transport(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("maintenance"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_method_other() {
        assert_eq!(TransportMethod::Get.other(), TransportMethod::Post);
        assert_eq!(TransportMethod::Post.to_string(), "POST");
    }
}
