//! Startup validation of backends
//!
//! Each backend must answer `GET /v1/models` with a success status and a
//! non-empty `data` array. Anything else marks it permanently failed; the
//! gateway still starts with whatever passed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use futures::future::join_all;
use serde::Deserialize;

use super::{Backend, LoadBalancer};

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Outcome of probing one backend
#[derive(Debug)]
pub struct ValidationReport {
    pub name: String,
    /// Number of models advertised, or why the probe failed
    pub result: Result<usize, String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Probe one backend's model list
pub async fn probe_backend(client: &reqwest::Client, backend: &Backend) -> anyhow::Result<usize> {
    let response = client
        .get(backend.url_for("/v1/models"))
        .bearer_auth(&backend.api_key)
        .header("x-api-key", &backend.api_key)
        .send()
        .await
        .context("request failed")?;

    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {}", status.as_u16());
    }

    let models: ModelList = response.json().await.context("decoding model list")?;
    if models.data.is_empty() {
        bail!("data array is empty");
    }
    Ok(models.data.len())
}

/// Probe every registered backend concurrently and mark the failures
pub async fn validate_backends(
    balancer: &LoadBalancer,
    timeout: Duration,
) -> anyhow::Result<Vec<ValidationReport>> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create validation client")?;

    let backends = balancer.backends();
    let probes = backends.iter().map(|backend| {
        let client = &client;
        let backend = Arc::clone(backend);
        async move {
            let result = probe_backend(client, &backend).await;
            (backend, result)
        }
    });

    let mut reports = Vec::with_capacity(backends.len());
    for (backend, result) in join_all(probes).await {
        let result = match result {
            Ok(models) => {
                tracing::info!(backend = %backend.name, models, "Backend validated");
                Ok(models)
            }
            Err(e) => {
                backend.mark_permanently_failed();
                tracing::error!(
                    backend = %backend.name,
                    "Backend failed validation, permanently disabled: {:#}",
                    e
                );
                Err(format!("{:#}", e))
            }
        };
        reports.push(ValidationReport {
            name: backend.name.clone(),
            result,
        });
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::{HealthPolicy, HealthState};
    use crate::test_support::{closed_port_url, spawn_upstream};
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };

    async fn models(headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
        let bearer_ok = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer good-key");
        let header_ok = headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some("good-key");
        if !(bearer_ok && header_ok) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(serde_json::json!({
            "object": "list",
            "data": [{"id": "gpt-4o"}, {"id": "claude-sonnet-4"}]
        })))
    }

    async fn empty_models() -> Json<serde_json::Value> {
        Json(serde_json::json!({"object": "list", "data": []}))
    }

    #[tokio::test]
    async fn test_validation_marks_failures() {
        let good = spawn_upstream(Router::new().route("/v1/models", get(models))).await;
        let empty = spawn_upstream(Router::new().route("/v1/models", get(empty_models))).await;
        let dead = closed_port_url().await;

        let lb = LoadBalancer::from_backends(
            vec![
                Arc::new(Backend::new("good", good.clone(), "good-key", 1, 5)),
                Arc::new(Backend::new("bad-key", good, "wrong", 1, 5)),
                Arc::new(Backend::new("empty", empty, "good-key", 1, 5)),
                Arc::new(Backend::new("dead", dead, "good-key", 1, 5)),
            ],
            HealthPolicy::default(),
        );

        let reports = validate_backends(&lb, Duration::from_secs(5)).await.unwrap();
        let passed: Vec<&str> = reports
            .iter()
            .filter(|r| r.passed())
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(passed, vec!["good"]);
        assert_eq!(reports[0].result, Ok(2));
        assert_eq!(reports[1].result, Err("HTTP 401".to_string()));
        assert_eq!(reports[2].result, Err("data array is empty".to_string()));

        let states: Vec<HealthState> = lb.snapshot().into_iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![
                HealthState::Eligible,
                HealthState::PermanentlyFailed,
                HealthState::PermanentlyFailed,
                HealthState::PermanentlyFailed,
            ]
        );
        for _ in 0..50 {
            assert_eq!(lb.pick().unwrap().name, "good");
        }
    }
}
