//! SSE response relay
//!
//! A relay task pulls chunks from upstream and pushes them through a small
//! channel that backs the client body. Chunks reach the client as they
//! arrive; a copy is kept so usage can be read once the stream ends.
//!
//! If the client goes away the channel closes, the task stops, the upstream
//! response is dropped (cancelling it), and nothing is billed.

use axum::{
    body::Body,
    http::{header, response::Builder, HeaderValue, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::proxy::error::ProxyError;
use crate::proxy::sse::extract_stream_usage;
use crate::proxy::state::UsageContext;

/// Chunks buffered between the relay task and the client
const RELAY_BUFFER: usize = 32;

pub(super) fn relay(
    builder: Builder,
    upstream: reqwest::Response,
    usage: UsageContext,
) -> Result<Response<Body>, ProxyError> {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(RELAY_BUFFER);

    tokio::spawn(async move {
        let mut chunks = Box::pin(upstream.bytes_stream());
        let mut captured: Vec<u8> = Vec::new();
        let mut client_gone = false;

        loop {
            tokio::select! {
                _ = tx.closed() => {
                    client_gone = true;
                    break;
                }
                next = chunks.next() => match next {
                    Some(Ok(chunk)) => {
                        captured.extend_from_slice(&chunk);
                        if tx.send(Ok(chunk)).await.is_err() {
                            client_gone = true;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(backend = %usage.backend, "Upstream stream failed: {}", e);
                        let _ = tx
                            .send(Err(std::io::Error::new(std::io::ErrorKind::Other, e)))
                            .await;
                        break;
                    }
                    None => break,
                },
            }
        }

        if client_gone {
            tracing::debug!(backend = %usage.backend, "Client disconnected mid-stream");
            return;
        }
        usage.finish(extract_stream_usage(&captured));
    });

    let mut response = builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ProxyError::ResponseBuild(e.to_string()))?;

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}
