//! API key check for the forwarding routes

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::KeyCache;
use crate::proxy::helpers::{extract_api_key, key_fingerprint};
use crate::proxy::ProxyError;
use crate::storage::Status;

/// Resolve the caller's key and attach its [`KeyInfo`](super::KeyInfo) to the request
pub async fn require_api_key(
    State(keys): State<Arc<KeyCache>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    let key = extract_api_key(req.headers()).ok_or(ProxyError::MissingApiKey)?;

    let Some(info) = keys.get(&key) else {
        tracing::debug!(key = %key_fingerprint(&key), "Unknown api key");
        return Err(ProxyError::InvalidApiKey);
    };

    if info.user_status != Status::Active {
        return Err(ProxyError::UserDisabled);
    }

    req.extensions_mut().insert(info);
    Ok(next.run(req).await)
}
