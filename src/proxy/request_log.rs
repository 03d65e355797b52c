//! One structured log line per request

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};

use super::state::ForwardTrace;

pub async fn log_request(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let trace = response.extensions().get::<ForwardTrace>();
    let backend = trace.map(|t| t.backend.as_str()).unwrap_or("-");
    let account = trace
        .and_then(|t| t.account.as_deref())
        .unwrap_or("-");

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        backend,
        account,
        "request"
    );

    response
}
