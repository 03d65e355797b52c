//! Request and response handlers for the proxy
//!
//! This module contains the main request handler (`forward`) and
//! response handlers for streaming (SSE) and buffered responses.

mod buffered;
mod request;
mod streaming;

pub use request::forward;

use axum::http::{response::Builder, Response, StatusCode};

use super::helpers::is_hop_by_hop_header;

/// Start a client response carrying the upstream status and headers
pub(super) fn response_builder(
    status: StatusCode,
    upstream_headers: &reqwest::header::HeaderMap,
) -> Builder {
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_headers.iter() {
        if is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
}
