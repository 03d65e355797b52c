//! Daily rollup of raw usage into `daily_stats`
//!
//! Runs once at startup and then on a fixed interval. Each run re-aggregates
//! the previous UTC day, which is safe because the store upserts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::storage::UsageStore;

pub struct DailyAggregator {
    store: Arc<dyn UsageStore>,
    interval: Duration,
}

impl DailyAggregator {
    pub fn new(store: Arc<dyn UsageStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// One rollup of yesterday (UTC)
    pub fn run_once(&self) -> anyhow::Result<usize> {
        let today = Utc::now().date_naive();
        let yesterday = today.pred_opt().unwrap_or(today);
        self.run_for(yesterday)
    }

    pub fn run_for(&self, date: NaiveDate) -> anyhow::Result<usize> {
        let rows = self.store.aggregate_for_date(date)?;
        tracing::info!(%date, rows, "Daily usage aggregated");
        Ok(rows)
    }

    /// Run immediately, then every interval, for the life of the process
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let this = self.clone();
                match tokio::task::spawn_blocking(move || this.run_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::error!("Daily aggregation failed: {:#}", e),
                    Err(e) => tracing::error!("Daily aggregation task panicked: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ApiKey, SqliteStore, User};
    use crate::usage::UsageRecord;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    /// Remembers the dates it was asked to roll up
    #[derive(Default)]
    struct DateLog {
        dates: Mutex<Vec<NaiveDate>>,
        fail: bool,
    }

    impl UsageStore for DateLog {
        fn insert_usage(&self, _record: &UsageRecord) -> anyhow::Result<()> {
            Ok(())
        }

        fn aggregate_for_date(&self, date: NaiveDate) -> anyhow::Result<usize> {
            self.dates.lock().unwrap().push(date);
            if self.fail {
                anyhow::bail!("database is locked");
            }
            Ok(1)
        }

        fn list_active_keys(&self) -> anyhow::Result<Vec<ApiKey>> {
            Ok(Vec::new())
        }

        fn list_users(&self) -> anyhow::Result<Vec<User>> {
            Ok(Vec::new())
        }

        fn find_user_by_account(&self, _account: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }
    }

    #[test]
    fn test_run_once_targets_yesterday() {
        let log = Arc::new(DateLog::default());
        let aggregator = DailyAggregator::new(log.clone(), Duration::from_secs(300));

        aggregator.run_once().unwrap();

        let expected = Utc::now().date_naive() - ChronoDuration::days(1);
        assert_eq!(log.dates.lock().unwrap().as_slice(), &[expected]);
    }

    #[test]
    fn test_rerun_with_sqlite_keeps_one_row() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let yesterday = Utc::now() - ChronoDuration::days(1);
        store
            .insert_usage(&UsageRecord {
                user_id: 7,
                api_key_id: 3,
                model: "gpt-4o".to_string(),
                backend: "primary".to_string(),
                input_tokens: 1000,
                output_tokens: 200,
                total_tokens: 1200,
                cost_usd: 0.0045,
                status_code: 200,
                latency: Duration::from_millis(40),
                recorded_at: yesterday,
            })
            .unwrap();

        let aggregator = DailyAggregator::new(store.clone(), Duration::from_secs(300));
        aggregator.run_once().unwrap();
        aggregator.run_once().unwrap();

        let stats = store.daily_stats(yesterday.date_naive()).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].request_count, 1);
        assert_eq!(stats[0].total_tokens, 1200);
    }

    #[tokio::test]
    async fn test_loop_survives_failures() {
        let log = Arc::new(DateLog {
            dates: Mutex::new(Vec::new()),
            fail: true,
        });
        let aggregator = Arc::new(DailyAggregator::new(log.clone(), Duration::from_millis(10)));

        let handle = aggregator.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(log.dates.lock().unwrap().len() >= 2);
    }
}
