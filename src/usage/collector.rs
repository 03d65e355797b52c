//! Usage collector
//!
//! Request handlers hand finished [`UsageRecord`]s to the collector and move
//! on. Records go through a bounded channel to a single dedicated writer
//! thread that persists them one at a time, in enqueue order.
//!
//! ```text
//! handler ──try_send──→ [ bounded queue ] ──→ writer thread ──→ UsageStore
//!            (full: drop + warn)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::UsageRecord;
use crate::storage::UsageStore;

/// Counters for the collector itself
#[derive(Debug, Default)]
pub struct CollectorMetrics {
    /// Records accepted into the queue
    pub enqueued: AtomicU64,
    /// Records written by the store
    pub persisted: AtomicU64,
    /// Records the store rejected
    pub failed: AtomicU64,
    /// Records dropped because the queue was full
    pub dropped: AtomicU64,
}

impl CollectorMetrics {
    pub fn snapshot(&self) -> CollectorMetricsSnapshot {
        CollectorMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorMetricsSnapshot {
    pub enqueued: u64,
    pub persisted: u64,
    pub failed: u64,
    pub dropped: u64,
}

enum CollectorCommand {
    Record(Box<UsageRecord>),
    Shutdown,
}

/// Bounded, drop-on-full usage queue with one writer thread
pub struct UsageCollector {
    tx: SyncSender<CollectorCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<CollectorMetrics>,
}

impl UsageCollector {
    /// Start the writer thread. A capacity of 0 is bumped to 1.
    pub fn start(store: Arc<dyn UsageStore>, capacity: usize) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<CollectorCommand>(capacity.max(1));

        let metrics = Arc::new(CollectorMetrics::default());
        let worker_metrics = metrics.clone();

        // Dedicated OS thread, store calls are blocking
        let worker = thread::Builder::new()
            .name("usage-collector".into())
            .spawn(move || Self::run_worker(rx, store, worker_metrics))?;

        Ok(Self {
            tx,
            worker: Mutex::new(Some(worker)),
            metrics,
        })
    }

    /// Queue a record without blocking. Drops it when the queue is full.
    pub fn emit(&self, record: UsageRecord) {
        match self.tx.try_send(CollectorCommand::Record(Box::new(record))) {
            Ok(()) => {
                self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.metrics.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "Usage queue full, dropping record");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::error!("Usage collector worker is gone, dropping record");
            }
        }
    }

    pub fn metrics(&self) -> CollectorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Persist everything already queued, then stop the worker
    ///
    /// Blocks until the worker exits. Safe to call more than once.
    pub fn shutdown(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        let _ = self.tx.send(CollectorCommand::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Usage collector worker panicked");
        }
        tracing::debug!("Usage collector shut down");
    }

    fn run_worker(
        rx: Receiver<CollectorCommand>,
        store: Arc<dyn UsageStore>,
        metrics: Arc<CollectorMetrics>,
    ) {
        while let Ok(command) = rx.recv() {
            let record = match command {
                CollectorCommand::Record(record) => record,
                CollectorCommand::Shutdown => break,
            };

            match store.insert_usage(&record) {
                Ok(()) => {
                    metrics.persisted.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    metrics.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        user_id = record.user_id,
                        model = %record.model,
                        "Failed to persist usage record: {:#}",
                        e
                    );
                }
            }
        }
    }
}

impl Drop for UsageCollector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ApiKey, User};
    use chrono::{NaiveDate, Utc};
    use std::time::Duration;

    fn record(user_id: i64, model: &str) -> UsageRecord {
        UsageRecord {
            user_id,
            api_key_id: 1,
            model: model.to_string(),
            backend: "primary".to_string(),
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            cost_usd: 0.0,
            status_code: 200,
            latency: Duration::from_millis(3),
            recorded_at: Utc::now(),
        }
    }

    /// Records every insert; optionally parks each insert until released
    /// and rejects records whose model is "bad".
    struct RecordingStore {
        seen: Mutex<Vec<i64>>,
        gate: Option<(Mutex<mpsc::Sender<()>>, Mutex<mpsc::Receiver<()>>)>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn gated() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let store = Self {
                seen: Mutex::new(Vec::new()),
                gate: Some((Mutex::new(entered_tx), Mutex::new(release_rx))),
            };
            (store, entered_rx, release_tx)
        }

        fn seen(&self) -> Vec<i64> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl UsageStore for RecordingStore {
        fn insert_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
            if let Some((entered, release)) = &self.gate {
                entered.lock().unwrap().send(()).unwrap();
                release.lock().unwrap().recv().unwrap();
            }
            if record.model == "bad" {
                anyhow::bail!("disk full");
            }
            self.seen.lock().unwrap().push(record.user_id);
            Ok(())
        }

        fn aggregate_for_date(&self, _date: NaiveDate) -> anyhow::Result<usize> {
            Ok(0)
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
    fn test_persists_in_enqueue_order() {
        let store = Arc::new(RecordingStore::new());
        let collector = UsageCollector::start(store.clone(), 16).unwrap();

        for user_id in 1..=5 {
            collector.emit(record(user_id, "gpt-4o"));
        }
        collector.shutdown();

        assert_eq!(store.seen(), vec![1, 2, 3, 4, 5]);
        let metrics = collector.metrics();
        assert_eq!(metrics.enqueued, 5);
        assert_eq!(metrics.persisted, 5);
        assert_eq!(metrics.dropped, 0);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (store, entered, release) = RecordingStore::gated();
        let store = Arc::new(store);
        let collector = UsageCollector::start(store.clone(), 2).unwrap();

        // Worker takes the first record and parks inside the store
        collector.emit(record(1, "gpt-4o"));
        entered.recv().unwrap();

        // Two fill the queue, the third has nowhere to go
        collector.emit(record(2, "gpt-4o"));
        collector.emit(record(3, "gpt-4o"));
        collector.emit(record(4, "gpt-4o"));
        assert_eq!(collector.metrics().dropped, 1);

        for _ in 0..3 {
            release.send(()).unwrap();
        }
        collector.shutdown();

        assert_eq!(store.seen(), vec![1, 2, 3]);
        let metrics = collector.metrics();
        assert_eq!(metrics.enqueued, 3);
        assert_eq!(metrics.persisted, 3);
    }

    #[test]
    fn test_store_errors_do_not_stop_worker() {
        let store = Arc::new(RecordingStore::new());
        let collector = UsageCollector::start(store.clone(), 8).unwrap();

        collector.emit(record(1, "gpt-4o"));
        collector.emit(record(2, "bad"));
        collector.emit(record(3, "gpt-4o"));
        collector.shutdown();

        assert_eq!(store.seen(), vec![1, 3]);
        let metrics = collector.metrics();
        assert_eq!(metrics.persisted, 2);
        assert_eq!(metrics.failed, 1);
    }

    #[test]
    fn test_shutdown_twice_is_harmless() {
        let store = Arc::new(RecordingStore::new());
        let collector = UsageCollector::start(store, 0).unwrap();
        collector.shutdown();
        collector.shutdown();
        // Worker is gone, emit must not block or panic
        collector.emit(record(1, "gpt-4o"));
    }
}
