//! Upstream backends and balancer tuning
//!
//! ```toml
//! [balancer]
//! error_threshold = 5
//! recovery_interval_secs = 30
//!
//! [[backends]]
//! name = "primary"
//! url = "https://api.example.com"
//! api_key_env = "PRIMARY_API_KEY"
//! weight = 3
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::balancer::{DEFAULT_ERROR_THRESHOLD, DEFAULT_QUIET_PERIOD};

// ─────────────────────────────────────────────────────────────────────────────
// Backends
// ─────────────────────────────────────────────────────────────────────────────

/// One configured upstream
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub name: String,
    pub url: String,
    pub api_key: String,
    /// Relative share of traffic; values below 1 are treated as 1
    pub weight: i64,
    /// Disabled entries never enter the balancer
    pub enabled: bool,
}

/// A `[[backends]]` entry as loaded from file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileBackend {
    pub name: Option<String>,
    pub url: Option<String>,
    /// API key value (direct, less secure - prefer api_key_env)
    pub api_key: Option<String>,
    /// Environment variable name to read the key from (preferred)
    pub api_key_env: Option<String>,
    pub weight: Option<i64>,
    pub enabled: Option<bool>,
}

impl FileBackend {
    /// Resolve the key: env var > direct value
    fn resolve_key(&self, env: &dyn Fn(&str) -> Option<String>) -> String {
        if let Some(env_name) = &self.api_key_env {
            if let Some(value) = env(env_name).filter(|v| !v.is_empty()) {
                return value;
            }
        }
        self.api_key.clone().unwrap_or_default()
    }
}

impl BackendConfig {
    /// Create from file config. Unnamed entries get `backend-<n>`.
    pub fn from_file(
        index: usize,
        file: FileBackend,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let api_key = file.resolve_key(env);
        Self {
            name: file
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("backend-{}", index + 1)),
            url: file.url.unwrap_or_default().trim().to_string(),
            api_key,
            weight: file.weight.unwrap_or(1),
            enabled: file.enabled.unwrap_or(true),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Balancer
// ─────────────────────────────────────────────────────────────────────────────

/// Health and timeout settings for the balancer
#[derive(Debug, Clone, PartialEq)]
pub struct BalancerConfig {
    /// Consecutive errors before a backend is disabled
    pub error_threshold: u32,
    /// How often disabled backends are considered for recovery
    pub recovery_interval: Duration,
    /// Time since last error before a disabled backend is re-enabled
    pub quiet_period: Duration,
    /// Timeout for the startup `/v1/models` probe
    pub validation_timeout: Duration,
    /// Timeout for forwarded requests (whole response, streams included)
    pub upstream_timeout: Duration,
    /// Probe every backend before serving
    pub validate_on_startup: bool,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            recovery_interval: Duration::from_secs(30),
            quiet_period: DEFAULT_QUIET_PERIOD,
            validation_timeout: Duration::from_secs(15),
            upstream_timeout: Duration::from_secs(300), // 5 minutes for long generations
            validate_on_startup: true,
        }
    }
}

/// Balancer settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileBalancer {
    pub error_threshold: Option<u32>,
    pub recovery_interval_secs: Option<u64>,
    pub quiet_period_secs: Option<u64>,
    pub validation_timeout_secs: Option<u64>,
    pub upstream_timeout_secs: Option<u64>,
    pub validate_on_startup: Option<bool>,
}

impl BalancerConfig {
    /// Create from file config with defaults. Zero intervals and timeouts
    /// fall back to the defaults; a zero quiet period is kept.
    pub fn from_file(file: Option<FileBalancer>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            error_threshold: file
                .error_threshold
                .filter(|t| *t > 0)
                .unwrap_or(defaults.error_threshold),
            recovery_interval: file
                .recovery_interval_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.recovery_interval),
            quiet_period: file
                .quiet_period_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.quiet_period),
            validation_timeout: file
                .validation_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.validation_timeout),
            upstream_timeout: file
                .upstream_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            validate_on_startup: file
                .validate_on_startup
                .unwrap_or(defaults.validate_on_startup),
        }
    }
}
