//! In-memory transport for testing.
//!
//! Responses are matched by substring against the request URL and body,
//! first route wins. Bodies are streamed in fixed-size chunks so decoders see
//! record boundaries split across reads, and a route may fail partway through
//! to simulate a dropped connection.

use crate::error::{Result, WfsError};
use crate::transport::{Transport, TransportResponse, WireRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Route {
    needle: String,
    status: u16,
    body: Bytes,
    chunk_size: usize,
    fail_after: Option<usize>,
}

/// Canned-response transport that records every request it receives.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<WireRequest>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests containing `needle` with a 200 and `body`.
    pub fn route(self, needle: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.push(needle, 200, body, 64, None)
    }

    /// Answer with an explicit status.
    pub fn route_status(
        self,
        needle: impl Into<String>,
        status: u16,
        body: impl Into<Bytes>,
    ) -> Self {
        self.push(needle, status, body, 64, None)
    }

    /// Stream `body` but fail with an IO error once `fail_after` bytes were sent.
    pub fn route_truncated(
        self,
        needle: impl Into<String>,
        body: impl Into<Bytes>,
        fail_after: usize,
    ) -> Self {
        self.push(needle, 200, body, 64, Some(fail_after))
    }

    fn push(
        self,
        needle: impl Into<String>,
        status: u16,
        body: impl Into<Bytes>,
        chunk_size: usize,
        fail_after: Option<usize>,
    ) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(Route {
                needle: needle.into(),
                status,
                body: body.into(),
                chunk_size,
                fail_after,
            });
        }
        self
    }

    /// All requests sent so far.
    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of requests whose URL or body contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches(r, needle))
            .count()
    }
}

fn matches(request: &WireRequest, needle: &str) -> bool {
    request.url.contains(needle)
        || request
            .body
            .as_deref()
            .map(|b| b.contains(needle))
            .unwrap_or(false)
}

fn chunked(route: &Route) -> Vec<Result<Bytes>> {
    let limit = route.fail_after.unwrap_or(route.body.len()).min(route.body.len());
    let mut chunks: Vec<Result<Bytes>> = (0..limit)
        .step_by(route.chunk_size.max(1))
        .map(|start| Ok(route.body.slice(start..(start + route.chunk_size).min(limit))))
        .collect();
    if route.fail_after.is_some() {
        chunks.push(Err(WfsError::Io("connection reset by peer".to_string())));
    }
    chunks
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: &WireRequest) -> Result<TransportResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let route = self
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.iter().find(|r| matches(request, &r.needle)).cloned())
            .ok_or_else(|| WfsError::Io(format!("No route for {}", request.url)))?;

        Ok(TransportResponse {
            status: route.status,
            content_type: Some("text/xml".to_string()),
            body: futures::stream::iter(chunked(&route)).boxed(),
        })
    }
}
