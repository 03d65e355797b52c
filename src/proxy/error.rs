//! Gateway error types and response handling

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};

/// Errors that end a request at the gateway
#[derive(Debug)]
pub enum ProxyError {
    NoBackend,
    BodyRead(String),
    Upstream(String),
    ResponseBuild(String),
    MissingApiKey,
    InvalidApiKey,
    UserDisabled,
    UserNotFound,
    InvalidCode,
    Storage(String),
}

impl ProxyError {
    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            ProxyError::NoBackend => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no backend available".to_string(),
            ),
            ProxyError::BodyRead(msg) => (StatusCode::BAD_REQUEST, msg),
            ProxyError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ProxyError::ResponseBuild(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ProxyError::MissingApiKey => (StatusCode::UNAUTHORIZED, "missing api key".to_string()),
            ProxyError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid or expired api key".to_string(),
            ),
            ProxyError::UserDisabled => (StatusCode::FORBIDDEN, "user is disabled".to_string()),
            ProxyError::UserNotFound => (StatusCode::NOT_FOUND, "user not found".to_string()),
            ProxyError::InvalidCode => (
                StatusCode::UNAUTHORIZED,
                "invalid or expired code".to_string(),
            ),
            ProxyError::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!("Gateway error: {} - {}", status, message);
        } else {
            tracing::debug!("Request rejected: {} - {}", status, message);
        }

        let body = serde_json::json!({ "error": message }).to_string();
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}
