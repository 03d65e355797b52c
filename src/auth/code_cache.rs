//! One-time verification codes keyed by account
//!
//! Each account holds at most one code. A code is good until its TTL passes
//! or it is used once, whichever comes first. Expired entries are also
//! swept in the background so abandoned codes do not pile up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct CodeEntry {
    code: String,
    expires_at: Instant,
}

impl CodeEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug)]
pub struct CodeCache {
    entries: Mutex<HashMap<String, CodeEntry>>,
    ttl: Duration,
}

impl CodeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a code for `account`, replacing any previous one
    pub fn set(&self, account: &str, code: &str) {
        self.set_at(account, code, Instant::now());
    }

    pub fn set_at(&self, account: &str, code: &str, now: Instant) {
        let entry = CodeEntry {
            code: code.to_string(),
            expires_at: now + self.ttl,
        };
        self.lock().insert(account.to_string(), entry);
    }

    /// Check `code` for `account`, consuming it on success
    pub fn verify(&self, account: &str, code: &str) -> bool {
        self.verify_at(account, code, Instant::now())
    }

    /// Absent or expired: false, and any stale entry is removed.
    /// Wrong code: false, entry kept so the caller may retry.
    /// Right code: true, entry removed.
    pub fn verify_at(&self, account: &str, code: &str, now: Instant) -> bool {
        let mut entries = self.lock();
        match entries.get(account) {
            None => false,
            Some(entry) if entry.is_expired(now) => {
                entries.remove(account);
                false
            }
            Some(entry) if entry.code != code => false,
            Some(_) => {
                entries.remove(account);
                true
            }
        }
    }

    /// Drop every expired entry, returning how many went
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Sweep on the TTL interval for the life of the process
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.ttl.max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired verification codes");
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CodeEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn test_code_is_single_use() {
        let cache = CodeCache::new(TTL);
        let now = Instant::now();
        cache.set_at("alice@example.com", "123456", now);

        assert!(cache.verify_at("alice@example.com", "123456", now));
        assert!(!cache.verify_at("alice@example.com", "123456", now));
    }

    #[test]
    fn test_wrong_code_keeps_entry() {
        let cache = CodeCache::new(TTL);
        let now = Instant::now();
        cache.set_at("alice", "123456", now);

        assert!(!cache.verify_at("alice", "000000", now));
        assert_eq!(cache.len(), 1);
        assert!(cache.verify_at("alice", "123456", now));
    }

    #[test]
    fn test_expired_code_fails_without_sweep() {
        let cache = CodeCache::new(TTL);
        let now = Instant::now();
        cache.set_at("alice", "123456", now);

        let later = now + TTL + Duration::from_secs(1);
        assert!(!cache.verify_at("alice", "123456", later));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_code_valid_at_exact_expiry() {
        let cache = CodeCache::new(TTL);
        let now = Instant::now();
        cache.set_at("alice", "123456", now);
        assert!(cache.verify_at("alice", "123456", now + TTL));
    }

    #[test]
    fn test_set_overwrites_previous_code() {
        let cache = CodeCache::new(TTL);
        let now = Instant::now();
        cache.set_at("alice", "111111", now);
        cache.set_at("alice", "222222", now);

        assert!(!cache.verify_at("alice", "111111", now));
        assert!(cache.verify_at("alice", "222222", now));
    }

    #[test]
    fn test_unknown_account() {
        let cache = CodeCache::new(TTL);
        assert!(!cache.verify("nobody", "123456"));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = CodeCache::new(TTL);
        let now = Instant::now();
        cache.set_at("old", "111111", now);
        cache.set_at("new", "222222", now + Duration::from_secs(200));

        let removed = cache.sweep_expired_at(now + TTL + Duration::from_secs(1));
        assert_eq!(removed, 1);
        assert!(cache.verify_at("new", "222222", now + TTL + Duration::from_secs(1)));
    }
}
