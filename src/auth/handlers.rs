//! Verification code endpoints
//!
//! `POST /auth/code` issues a code for an existing account and
//! `POST /auth/verify` redeems it. Delivery (mail, SMS) is not wired up; the
//! code is written to the log instead.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::{generate_code, CodeCache};
use crate::proxy::ProxyError;
use crate::storage::{Status, UsageStore, User};

#[derive(Clone)]
pub struct CodeState {
    pub store: Arc<dyn UsageStore>,
    pub codes: Arc<CodeCache>,
}

#[derive(Debug, Deserialize)]
pub struct SendCodeRequest {
    pub account: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendCodeResponse {
    pub message: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub account: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct VerifiedUser {
    pub user_id: i64,
    pub account: String,
    pub role: String,
}

pub async fn send_code(
    State(state): State<CodeState>,
    Json(req): Json<SendCodeRequest>,
) -> Result<Json<SendCodeResponse>, ProxyError> {
    let account = req.account.trim().to_string();
    find_user(&state, &account)
        .await?
        .ok_or(ProxyError::UserNotFound)?;

    let code = generate_code();
    state.codes.set(&account, &code);
    tracing::info!(account = %account, code = %code, "Verification code issued");

    Ok(Json(SendCodeResponse {
        message: "code sent".to_string(),
        expires_in: state.codes.ttl().as_secs(),
    }))
}

pub async fn verify_code(
    State(state): State<CodeState>,
    Json(req): Json<VerifyCodeRequest>,
) -> Result<Json<VerifiedUser>, ProxyError> {
    let account = req.account.trim().to_string();
    if !state.codes.verify(&account, req.code.trim()) {
        return Err(ProxyError::InvalidCode);
    }

    let user = find_user(&state, &account)
        .await?
        .ok_or(ProxyError::UserNotFound)?;
    if user.status != Status::Active {
        return Err(ProxyError::UserDisabled);
    }

    tracing::info!(account = %account, "Verification code accepted");
    Ok(Json(VerifiedUser {
        user_id: user.id,
        account: user.account,
        role: user.role,
    }))
}

async fn find_user(state: &CodeState, account: &str) -> Result<Option<User>, ProxyError> {
    let store = state.store.clone();
    let account = account.to_string();
    tokio::task::spawn_blocking(move || store.find_user_by_account(&account))
        .await
        .map_err(|e| ProxyError::Storage(e.to_string()))?
        .map_err(|e| ProxyError::Storage(format!("{:#}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::post,
        Router,
    };
    use std::time::Duration;
    use tower::ServiceExt;

    fn setup() -> (Router, Arc<CodeCache>, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.create_user("alice", "Alice", "admin", 0).unwrap();
        store.create_user("bob", "Bob", "user", 0).unwrap();
        store.set_user_status("bob", Status::Disabled).unwrap();

        let codes = Arc::new(CodeCache::new(Duration::from_secs(300)));
        let state = CodeState {
            store: store.clone(),
            codes: codes.clone(),
        };
        let app = Router::new()
            .route("/auth/code", post(send_code))
            .route("/auth/verify", post(verify_code))
            .with_state(state);
        (app, codes, store)
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_then_verify() {
        let (app, codes, _store) = setup();

        let response = app
            .clone()
            .oneshot(json_post("/auth/code", serde_json::json!({"account": "alice"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(codes.len(), 1);

        // Replace the random code with a known one
        codes.set("alice", "424242");

        let response = app
            .clone()
            .oneshot(json_post(
                "/auth/verify",
                serde_json::json!({"account": "alice", "code": "424242"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let user: VerifiedUser = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(user.account, "alice");
        assert_eq!(user.role, "admin");

        // Second use fails
        let response = app
            .oneshot(json_post(
                "/auth/verify",
                serde_json::json!({"account": "alice", "code": "424242"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_account_gets_no_code() {
        let (app, codes, _store) = setup();
        let response = app
            .oneshot(json_post("/auth/code", serde_json::json!({"account": "mallory"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(codes.len(), 0);
    }

    #[tokio::test]
    async fn test_disabled_user_cannot_verify() {
        let (app, codes, _store) = setup();
        codes.set("bob", "111111");
        let response = app
            .oneshot(json_post(
                "/auth/verify",
                serde_json::json!({"account": "bob", "code": "111111"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
