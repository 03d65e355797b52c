//! Persistent storage for users, API keys and usage accounting
//!
//! The gateway talks to storage through the [`UsageStore`] trait so the hot
//! path (key cache, collector, aggregator) can be exercised against fakes.
//! [`sqlite::SqliteStore`] is the production implementation.

pub mod sqlite;

use chrono::{DateTime, NaiveDate, Utc};

use crate::usage::UsageRecord;

pub use sqlite::SqliteStore;

/// Lifecycle state shared by users and API keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Disabled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    /// Parse a stored status. Anything unrecognized is treated as disabled.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => Self::Active,
            _ => Self::Disabled,
        }
    }
}

/// A gateway user (an account that owns API keys)
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub account: String,
    pub name: String,
    pub role: String,
    pub status: Status,
    /// Token quota, 0 = unlimited
    pub quota_tokens: i64,
}

/// An API key row
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub status: Status,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One rolled-up row of `daily_stats`
#[derive(Debug, Clone, PartialEq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub user_id: i64,
    pub model: String,
    pub request_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
}

/// Storage operations the gateway core depends on
pub trait UsageStore: Send + Sync {
    /// Persist a single usage record
    fn insert_usage(&self, record: &UsageRecord) -> anyhow::Result<()>;

    /// Roll up raw usage for `date` into `daily_stats`. Idempotent: running
    /// twice for the same date leaves the same rows. Returns rows written.
    fn aggregate_for_date(&self, date: NaiveDate) -> anyhow::Result<usize>;

    /// Keys with status active (expiry is checked by the caller)
    fn list_active_keys(&self) -> anyhow::Result<Vec<ApiKey>>;

    fn list_users(&self) -> anyhow::Result<Vec<User>>;

    fn find_user_by_account(&self, account: &str) -> anyhow::Result<Option<User>>;
}
