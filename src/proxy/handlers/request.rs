//! Main forwarding handler

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::Response,
    Extension,
};

use super::{buffered, response_builder, streaming};
use crate::auth::KeyInfo;
use crate::proxy::error::ProxyError;
use crate::proxy::helpers::should_forward_request_header;
use crate::proxy::sse::is_sse_response;
use crate::proxy::state::{ForwardTrace, ProxyState, UsageContext};
use crate::proxy::tokens::request_model;

/// Largest request body the gateway will buffer
const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

/// Forward a request to a healthy backend and relay the answer
///
/// One backend, one attempt: a transport failure becomes a 502 and counts
/// against that backend, there is no retry on another one.
pub async fn forward(
    State(state): State<ProxyState>,
    caller: Option<Extension<Arc<KeyInfo>>>,
    req: Request,
) -> Result<Response<Body>, ProxyError> {
    let start = Instant::now();
    let caller = caller.map(|Extension(info)| info);

    let backend = state.balancer.pick().ok_or(ProxyError::NoBackend)?;

    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ProxyError::BodyRead(e.to_string()))?;
    let model = request_model(&body_bytes);

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let forward_url = backend.url_for(path_and_query);

    tracing::debug!(
        backend = %backend.name,
        model = %model,
        "Forwarding {} {}",
        parts.method,
        parts.uri.path()
    );

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if should_forward_request_header(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    let upstream = state
        .client
        .request(parts.method.clone(), &forward_url)
        .headers(headers)
        .bearer_auth(&backend.api_key)
        .header("x-api-key", &backend.api_key)
        .body(body_bytes)
        .send()
        .await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            backend.record_error();
            tracing::warn!(backend = %backend.name, "Upstream request failed: {}", e);
            return Err(ProxyError::Upstream(format!(
                "backend {} unreachable",
                backend.name
            )));
        }
    };
    backend.record_success();

    let status = upstream.status();
    let builder = response_builder(status, upstream.headers());
    let usage = UsageContext {
        collector: state.collector.clone(),
        caller: caller.clone(),
        model,
        backend: backend.name.clone(),
        status_code: status.as_u16(),
        started: start,
    };

    let mut response = if is_sse_response(upstream.headers()) {
        streaming::relay(builder, upstream, usage)?
    } else {
        buffered::relay(builder, upstream, usage).await?
    };

    response.extensions_mut().insert(ForwardTrace {
        backend: backend.name.clone(),
        account: caller.map(|c| c.account.clone()),
    });
    Ok(response)
}
