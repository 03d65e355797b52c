//! In-memory API key lookup
//!
//! Rebuilt wholesale from storage; lookups take a read lock only.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::storage::{ApiKey, Status, User};

/// What the gateway knows about a caller once their key checks out
#[derive(Debug, Clone, PartialEq)]
pub struct KeyInfo {
    pub key_id: i64,
    pub user_id: i64,
    pub account: String,
    /// 0 = unlimited
    pub quota_tokens: i64,
    pub user_status: Status,
}

#[derive(Debug, Default)]
pub struct KeyCache {
    entries: RwLock<HashMap<String, Arc<KeyInfo>>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole map with the usable keys from `keys`
    pub fn load(&self, keys: &[ApiKey], users: &[User]) -> usize {
        self.load_at(keys, users, Utc::now())
    }

    /// A key is kept only if it is active, not expired at `now`, and owned
    /// by an active user.
    pub fn load_at(&self, keys: &[ApiKey], users: &[User], now: DateTime<Utc>) -> usize {
        let users: HashMap<i64, &User> = users.iter().map(|u| (u.id, u)).collect();

        let fresh: HashMap<String, Arc<KeyInfo>> = keys
            .iter()
            .filter(|k| k.status == Status::Active)
            .filter(|k| k.expires_at.map_or(true, |exp| exp > now))
            .filter_map(|k| {
                let user = users.get(&k.user_id)?;
                if user.status != Status::Active {
                    return None;
                }
                Some((
                    k.key.clone(),
                    Arc::new(KeyInfo {
                        key_id: k.id,
                        user_id: user.id,
                        account: user.account.clone(),
                        quota_tokens: user.quota_tokens,
                        user_status: user.status,
                    }),
                ))
            })
            .collect();

        let count = fresh.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        count
    }

    pub fn get(&self, key: &str) -> Option<Arc<KeyInfo>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert a single entry, e.g. right after a key is created in-process
    #[allow(dead_code)]
    pub fn add(&self, key: impl Into<String>, info: KeyInfo) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), Arc::new(info));
    }

    #[allow(dead_code)]
    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(id: i64, account: &str, status: Status) -> User {
        User {
            id,
            account: account.to_string(),
            name: account.to_string(),
            role: "user".to_string(),
            status,
            quota_tokens: 0,
        }
    }

    fn key(id: i64, user_id: i64, key: &str, expires_at: Option<DateTime<Utc>>) -> ApiKey {
        ApiKey {
            id,
            user_id,
            key: key.to_string(),
            status: Status::Active,
            expires_at,
        }
    }

    #[test]
    fn test_load_filters_unusable_keys() {
        let now = Utc::now();
        let users = vec![
            user(1, "alice", Status::Active),
            user(2, "bob", Status::Disabled),
        ];
        let mut revoked = key(4, 1, "sk-revoked", None);
        revoked.status = Status::Disabled;
        let keys = vec![
            key(1, 1, "sk-live", None),
            key(2, 1, "sk-expired", Some(now - Duration::seconds(1))),
            key(3, 2, "sk-disabled-owner", None),
            revoked,
            key(5, 1, "sk-future", Some(now + Duration::days(30))),
            key(6, 99, "sk-orphan", None),
        ];

        let cache = KeyCache::new();
        assert_eq!(cache.load_at(&keys, &users, now), 2);

        let live = cache.get("sk-live").unwrap();
        assert_eq!(live.user_id, 1);
        assert_eq!(live.account, "alice");
        assert_eq!(live.user_status, Status::Active);
        assert!(cache.get("sk-future").is_some());
        assert!(cache.get("sk-expired").is_none());
        assert!(cache.get("sk-disabled-owner").is_none());
        assert!(cache.get("sk-revoked").is_none());
        assert!(cache.get("sk-orphan").is_none());
    }

    #[test]
    fn test_load_replaces_previous_contents() {
        let users = vec![user(1, "alice", Status::Active)];
        let cache = KeyCache::new();
        cache.load(&[key(1, 1, "sk-old", None)], &users);
        cache.load(&[key(2, 1, "sk-new", None)], &users);

        assert!(cache.get("sk-old").is_none());
        assert!(cache.get("sk-new").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_add_and_remove() {
        let cache = KeyCache::new();
        cache.add(
            "sk-added",
            KeyInfo {
                key_id: 9,
                user_id: 1,
                account: "alice".to_string(),
                quota_tokens: 0,
                user_status: Status::Active,
            },
        );
        assert_eq!(cache.get("sk-added").unwrap().key_id, 9);
        assert!(cache.remove("sk-added"));
        assert!(!cache.remove("sk-added"));
        assert!(cache.is_empty());
    }
}
