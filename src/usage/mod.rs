//! Usage accounting: per-request records, the background collector that
//! persists them, and the daily rollup loop.

pub mod aggregator;
pub mod collector;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use aggregator::DailyAggregator;
pub use collector::UsageCollector;

/// One completed request, as billed
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub user_id: i64,
    pub api_key_id: i64,
    /// Model named in the request body, empty when it could not be read
    pub model: String,
    pub backend: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub status_code: u16,
    pub latency: Duration,
    pub recorded_at: DateTime<Utc>,
}
