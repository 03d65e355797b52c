//! Weighted backend selection with per-backend health
//!
//! ```text
//!            5th consecutive error          success, or quiet period
//! Eligible ─────────────────────→ Disabled ─────────────────────→ Eligible
//!     │                                                    (recovery tick)
//!     └── startup validation failure ──→ PermanentlyFailed (terminal)
//! ```
//!
//! The backend list is fixed after construction. Each backend guards its own
//! health behind a small mutex, so transitions on one backend never contend
//! with another.

pub mod validate;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;

use crate::config::{BackendConfig, BalancerConfig};

pub use validate::validate_backends;

/// Consecutive errors that take a backend out of rotation
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;
/// How long a disabled backend must stay quiet before recovery
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Eligible,
    Disabled,
    PermanentlyFailed,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::Disabled => "disabled",
            Self::PermanentlyFailed => "failed",
        }
    }
}

#[derive(Debug)]
struct Health {
    state: HealthState,
    consecutive_errors: u32,
    last_error: Option<Instant>,
}

/// Health thresholds shared by every backend of a balancer
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub error_threshold: u32,
    pub quiet_period: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }
}

impl From<&BalancerConfig> for HealthPolicy {
    fn from(config: &BalancerConfig) -> Self {
        Self {
            error_threshold: config.error_threshold,
            quiet_period: config.quiet_period,
        }
    }
}

/// Point-in-time view of one backend, for logs and the `validate` command
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSnapshot {
    pub name: String,
    pub base_url: String,
    pub weight: u32,
    pub state: HealthState,
    pub consecutive_errors: u32,
}

/// One upstream provider
#[derive(Debug)]
pub struct Backend {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub weight: u32,
    error_threshold: u32,
    health: Mutex<Health>,
}

impl Backend {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        weight: i64,
        error_threshold: u32,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            weight: weight.clamp(1, i64::from(u32::MAX)) as u32,
            error_threshold: error_threshold.max(1),
            health: Mutex::new(Health {
                state: HealthState::Eligible,
                consecutive_errors: 0,
                last_error: None,
            }),
        }
    }

    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> HealthState {
        self.health().state
    }

    pub fn is_eligible(&self) -> bool {
        self.state() == HealthState::Eligible
    }

    /// Full upstream URL for a request path such as `/v1/messages`
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn record_error(&self) {
        self.record_error_at(Instant::now());
    }

    pub fn record_error_at(&self, now: Instant) {
        let mut health = self.health();
        health.consecutive_errors = health.consecutive_errors.saturating_add(1);
        health.last_error = Some(now);

        if health.state == HealthState::Eligible
            && health.consecutive_errors >= self.error_threshold
        {
            health.state = HealthState::Disabled;
            tracing::warn!(
                backend = %self.name,
                errors = health.consecutive_errors,
                "Backend disabled after consecutive errors"
            );
        }
    }

    pub fn record_success(&self) {
        let mut health = self.health();
        health.consecutive_errors = 0;
        if health.state == HealthState::Disabled {
            health.state = HealthState::Eligible;
            tracing::info!(backend = %self.name, "Backend re-enabled after success");
        }
    }

    /// Terminal: set by startup validation only
    pub fn mark_permanently_failed(&self) {
        self.health().state = HealthState::PermanentlyFailed;
    }

    /// Re-enable if disabled and quiet for longer than `quiet_period`
    fn try_recover(&self, now: Instant, quiet_period: Duration) -> bool {
        let mut health = self.health();
        if health.state != HealthState::Disabled {
            return false;
        }
        let quiet = health
            .last_error
            .map_or(true, |t| now.saturating_duration_since(t) > quiet_period);
        if quiet {
            health.state = HealthState::Eligible;
            health.consecutive_errors = 0;
        }
        quiet
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        let health = self.health();
        BackendSnapshot {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            weight: self.weight,
            state: health.state,
            consecutive_errors: health.consecutive_errors,
        }
    }
}

/// Registry of backends and the weighted picker over the healthy ones
#[derive(Debug)]
pub struct LoadBalancer {
    backends: RwLock<Vec<Arc<Backend>>>,
    policy: HealthPolicy,
}

impl LoadBalancer {
    /// Build from config. Entries with `enabled = false` never enter the registry.
    pub fn new(configs: &[BackendConfig], policy: HealthPolicy) -> Self {
        let backends = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| {
                Arc::new(Backend::new(
                    c.name.clone(),
                    c.url.clone(),
                    c.api_key.clone(),
                    c.weight,
                    policy.error_threshold,
                ))
            })
            .collect();
        Self::from_backends(backends, policy)
    }

    pub fn from_backends(backends: Vec<Arc<Backend>>, policy: HealthPolicy) -> Self {
        Self {
            backends: RwLock::new(backends),
            policy,
        }
    }

    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.backends().iter().map(|b| b.snapshot()).collect()
    }

    /// Weighted random choice among eligible backends
    pub fn pick(&self) -> Option<Arc<Backend>> {
        self.pick_with(&mut rand::thread_rng())
    }

    pub fn pick_with<R: Rng>(&self, rng: &mut R) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let pool: Vec<&Arc<Backend>> = backends.iter().filter(|b| b.is_eligible()).collect();
        let last = *pool.last()?;

        let total: u64 = pool.iter().map(|b| u64::from(b.weight)).sum();
        let mut point = rng.gen_range(0..total) as i64;
        for backend in &pool {
            point -= i64::from(backend.weight);
            if point < 0 {
                return Some(Arc::clone(backend));
            }
        }
        Some(Arc::clone(last))
    }

    /// One recovery pass. Returns the names of re-enabled backends.
    pub fn recover_idle(&self) -> Vec<String> {
        self.recover_idle_at(Instant::now())
    }

    pub fn recover_idle_at(&self, now: Instant) -> Vec<String> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let mut recovered = Vec::new();
        for backend in backends.iter() {
            if backend.try_recover(now, self.policy.quiet_period) {
                tracing::info!(backend = %backend.name, "Backend recovered after quiet period");
                recovered.push(backend.name.clone());
            }
        }
        recovered
    }

    /// Run [`recover_idle`](Self::recover_idle) every `period` for the life of the process
    pub fn spawn_recovery(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = period.max(Duration::from_millis(10));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                self.recover_idle();
            }
        })
    }
}
