//! Caller authentication: the API key cache, one-time verification codes,
//! and the HTTP pieces that use them.

pub mod code_cache;
pub mod handlers;
pub mod key_cache;
pub mod middleware;

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::storage::UsageStore;

pub use code_cache::CodeCache;
pub use key_cache::{KeyCache, KeyInfo};

/// Rebuild `cache` from storage. Returns the number of usable keys.
pub fn reload_key_cache(store: &dyn UsageStore, cache: &KeyCache) -> anyhow::Result<usize> {
    let keys = store.list_active_keys()?;
    let users = store.list_users()?;
    Ok(cache.load(&keys, &users))
}

/// Reload `cache` every `period` so key changes made by another process
/// show up without a restart. The first reload happens after one period.
pub fn spawn_key_reload(
    store: Arc<dyn UsageStore>,
    cache: Arc<KeyCache>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let store = store.clone();
            let cache = cache.clone();
            match tokio::task::spawn_blocking(move || reload_key_cache(store.as_ref(), &cache))
                .await
            {
                Ok(Ok(count)) => tracing::debug!(keys = count, "Key cache reloaded"),
                Ok(Err(e)) => tracing::warn!("Key cache reload failed, keeping old keys: {:#}", e),
                Err(e) => tracing::error!("Key cache reload task panicked: {}", e),
            }
        }
    })
}

/// New API key: `sk-` followed by 64 hex characters
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sk-{}", hex)
}

/// Six-digit, zero-padded verification code
pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteStore, Status};

    #[test]
    fn test_api_key_shape() {
        let key = generate_api_key();
        assert!(key.starts_with("sk-"));
        assert_eq!(key.len(), 67);
        assert!(key[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_api_key());
    }

    #[test]
    fn test_code_shape() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_reload_hides_keys_of_disabled_users() {
        let store = SqliteStore::in_memory().unwrap();
        let alice = store.create_user("alice", "Alice", "user", 0).unwrap();
        let bob = store.create_user("bob", "Bob", "user", 0).unwrap();
        store.create_api_key(alice, "a", "sk-alice", None).unwrap();
        store.create_api_key(bob, "b", "sk-bob", None).unwrap();

        let cache = KeyCache::new();
        assert_eq!(reload_key_cache(&store, &cache).unwrap(), 2);

        store.set_user_status("bob", Status::Disabled).unwrap();
        assert_eq!(reload_key_cache(&store, &cache).unwrap(), 1);
        assert!(cache.get("sk-alice").is_some());
        assert!(cache.get("sk-bob").is_none());
    }

    #[tokio::test]
    async fn test_periodic_reload_picks_up_new_keys() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = Arc::new(KeyCache::new());
        let handle = spawn_key_reload(store.clone(), cache.clone(), Duration::from_millis(20));

        let alice = store.create_user("alice", "Alice", "user", 0).unwrap();
        store.create_api_key(alice, "a", "sk-late", None).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();
        assert!(cache.get("sk-late").is_some());
    }
}
