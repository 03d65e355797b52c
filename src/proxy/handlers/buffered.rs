//! Buffered (non-streaming) response relay

use axum::{body::Body, http::response::Builder, http::Response};

use crate::proxy::error::ProxyError;
use crate::proxy::state::UsageContext;
use crate::proxy::tokens::extract_usage;

/// Read the whole upstream body, bill it, and write it to the client once
pub(super) async fn relay(
    builder: Builder,
    upstream: reqwest::Response,
    usage: UsageContext,
) -> Result<Response<Body>, ProxyError> {
    let body = upstream.bytes().await.map_err(|e| {
        tracing::warn!(backend = %usage.backend, "Upstream body read failed: {}", e);
        ProxyError::Upstream(format!("backend {} closed the response early", usage.backend))
    })?;

    usage.finish(extract_usage(&body));

    builder
        .body(Body::from(body))
        .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
}
