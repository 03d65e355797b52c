//! Gateway server setup and initialization

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;

use super::handlers::forward;
use super::request_log::log_request;
use super::state::ProxyState;
use crate::auth::handlers::{send_code, verify_code, CodeState};
use crate::auth::middleware::require_api_key;
use crate::auth::KeyCache;

/// HTTP client used for every upstream call
///
/// No default User-Agent is set; the caller's is forwarded. Compression is
/// not negotiated by the client, so bodies pass through byte-for-byte.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()
        .context("Failed to create HTTP client")
}

/// Build the router: authenticated `/v1` forwarding plus the code endpoints
pub fn build_router(state: ProxyState, keys: Arc<KeyCache>, codes: CodeState) -> Router {
    let v1 = Router::new()
        .route("/v1/chat/completions", post(forward))
        .route("/v1/messages", post(forward))
        .route("/v1/models", get(forward))
        // Passthrough for everything else under /v1
        .route("/v1/*path", any(forward))
        .route_layer(middleware::from_fn_with_state(keys, require_api_key))
        .with_state(state);

    let auth = Router::new()
        .route("/auth/code", post(send_code))
        .route("/auth/verify", post(verify_code))
        .with_state(codes);

    Router::new()
        .merge(v1)
        .merge(auth)
        .layer(middleware::from_fn(log_request))
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(
    bind_addr: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Gateway shut down gracefully");
    Ok(())
}
