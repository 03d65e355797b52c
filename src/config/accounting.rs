//! Database, usage accounting, and auth settings

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Database
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/gateway.db"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileDatabase {
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn from_file(file: Option<FileDatabase>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            path: file
                .path
                .map(PathBuf::from)
                .unwrap_or_else(|| Self::default().path),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Usage accounting
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UsageConfig {
    /// Collector queue size; records beyond it are dropped
    pub channel_buffer: usize,
    /// How often the daily rollup runs
    pub aggregate_interval: Duration,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            aggregate_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileUsage {
    pub channel_buffer: Option<usize>,
    pub aggregate_interval_secs: Option<u64>,
}

impl UsageConfig {
    pub fn from_file(file: Option<FileUsage>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            channel_buffer: file.channel_buffer.unwrap_or(defaults.channel_buffer),
            aggregate_interval: file
                .aggregate_interval_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.aggregate_interval),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    /// Lifetime of a verification code
    pub code_expiry: Duration,
    /// How often the key cache is rebuilt from storage
    pub key_reload_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            code_expiry: Duration::from_secs(5 * 60),
            key_reload_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileAuth {
    pub code_expiry_secs: Option<u64>,
    pub key_reload_interval_secs: Option<u64>,
}

impl AuthConfig {
    pub fn from_file(file: Option<FileAuth>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            code_expiry: file
                .code_expiry_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.code_expiry),
            key_reload_interval: file
                .key_reload_interval_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.key_reload_interval),
        }
    }
}
