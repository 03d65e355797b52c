//! Utility functions for request/response processing

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Check if a header carries caller credentials that must not reach a backend
pub(crate) fn is_auth_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == "authorization" || lower == "x-api-key"
}

/// Connection-level headers that only make sense for a single hop
pub(crate) fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "host"
            | "connection"
            | "keep-alive"
            | "proxy-connection"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

/// Request headers worth forwarding upstream
pub(crate) fn should_forward_request_header(name: &str) -> bool {
    !is_auth_header(name) && !is_hop_by_hop_header(name)
}

/// Pull the caller's API key from `Authorization: Bearer` or `x-api-key`
///
/// The scheme is matched case-insensitively. Empty values count as absent.
pub(crate) fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            let (scheme, token) = s.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Short stable fingerprint of an API key, safe to log (never log the key!)
pub(crate) fn key_fingerprint(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    format!("{:x}", hash)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("bearer sk-lower"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("sk-lower"));

        headers.insert("authorization", HeaderValue::from_static("Bearer sk-upper"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("sk-upper"));
    }

    #[test]
    fn test_falls_back_to_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        headers.insert("x-api-key", HeaderValue::from_static("sk-header"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("sk-header"));
    }

    #[test]
    fn test_missing_or_empty_key() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        headers.insert("x-api-key", HeaderValue::from_static(""));
        assert_eq!(extract_api_key(&headers), None);
    }

    #[test]
    fn test_forwarded_header_filter() {
        assert!(!should_forward_request_header("Authorization"));
        assert!(!should_forward_request_header("x-api-key"));
        assert!(!should_forward_request_header("Host"));
        assert!(!should_forward_request_header("content-length"));
        assert!(should_forward_request_header("content-type"));
        assert!(should_forward_request_header("anthropic-version"));
    }

    #[test]
    fn test_fingerprint_is_short_and_stable() {
        let a = key_fingerprint("sk-abc");
        assert_eq!(a.len(), 16);
        assert_eq!(a, key_fingerprint("sk-abc"));
        assert_ne!(a, key_fingerprint("sk-abd"));
    }
}
