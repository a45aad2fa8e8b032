//! Key-value store abstraction shared by every engine component.
//!
//! The store is the only shared mutable resource in the system. Everything
//! above it (cache layer, lock, queue, event history) talks to it through
//! [`KvStore`], so the Redis backend and the in-memory backend are
//! interchangeable.
//!
//! Two operations are *check-and-act*: [`KvStore::compare_and_delete`] and
//! [`KvStore::compare_and_expire`]. Implementations must run them as one
//! indivisible operation inside the store, never as a read followed by a
//! write from the client.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;
pub(crate) use self::redis_store::store_err;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command.
    #[error("store command failed: {0}")]
    Command(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Overwrite `key` with an expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Set `key` only if it does not exist. Returns whether it was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Reset the expiry of `key` only if it currently holds `expected`.
    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration)
        -> StoreResult<bool>;

    /// Append to a list, keep only the newest `cap` entries and refresh its expiry.
    /// The pushed entry is always kept, even with `cap` 0.
    async fn push_capped(&self, key: &str, value: &str, cap: usize, ttl: Duration)
        -> StoreResult<()>;

    /// Whole list, oldest first. Missing key yields an empty list.
    async fn list(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Append to a list without expiry (work queues).
    async fn push_back(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn pop_front(&self, key: &str) -> StoreResult<Option<String>>;

    /// All live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Round-trip check used at start-up.
    async fn ping(&self) -> StoreResult<()>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behavior every backend must share. The memory backend runs these in
    //! its unit tests; the Redis backend runs them behind `integration-tests`.

    use super::KvStore;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    pub async fn set_get_delete(store: &dyn KvStore, ns: &str) {
        let key = format!("{ns}:plain");
        assert_eq!(store.get(&key).await.unwrap(), None);
        store.set(&key, "v1", TTL).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("v1"));
        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
    }

    pub async fn set_nx_only_once(store: &dyn KvStore, ns: &str) {
        let key = format!("{ns}:nx");
        assert!(store.set_nx(&key, "a", TTL).await.unwrap());
        assert!(!store.set_nx(&key, "b", TTL).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("a"));
        store.delete(&key).await.unwrap();
    }

    pub async fn compare_and_act(store: &dyn KvStore, ns: &str) {
        let key = format!("{ns}:cas");
        store.set(&key, "owner", TTL).await.unwrap();
        assert!(!store.compare_and_delete(&key, "intruder").await.unwrap());
        assert!(!store
            .compare_and_expire(&key, "intruder", TTL)
            .await
            .unwrap());
        assert!(store.compare_and_expire(&key, "owner", TTL).await.unwrap());
        assert!(store.compare_and_delete(&key, "owner").await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    pub async fn capped_list_drops_oldest(store: &dyn KvStore, ns: &str) {
        let key = format!("{ns}:capped");
        for i in 0..5 {
            store
                .push_capped(&key, &i.to_string(), 3, TTL)
                .await
                .unwrap();
        }
        assert_eq!(store.list(&key).await.unwrap(), vec!["2", "3", "4"]);
        store.delete(&key).await.unwrap();
    }

    pub async fn zero_cap_keeps_newest(store: &dyn KvStore, ns: &str) {
        let key = format!("{ns}:uncapped");
        store.push_capped(&key, "old", 0, TTL).await.unwrap();
        store.push_capped(&key, "new", 0, TTL).await.unwrap();
        assert_eq!(store.list(&key).await.unwrap(), vec!["new"]);
        store.delete(&key).await.unwrap();
    }

    pub async fn queue_is_fifo(store: &dyn KvStore, ns: &str) {
        let key = format!("{ns}:queue");
        store.push_back(&key, "first").await.unwrap();
        store.push_back(&key, "second").await.unwrap();
        assert_eq!(store.pop_front(&key).await.unwrap().as_deref(), Some("first"));
        assert_eq!(store.pop_front(&key).await.unwrap().as_deref(), Some("second"));
        assert_eq!(store.pop_front(&key).await.unwrap(), None);
    }

    pub async fn prefix_scan(store: &dyn KvStore, ns: &str) {
        store.set(&format!("{ns}:scan:a"), "1", TTL).await.unwrap();
        store.set(&format!("{ns}:scan:b"), "2", TTL).await.unwrap();
        store.set(&format!("{ns}:other"), "3", TTL).await.unwrap();

        let mut keys = store.keys_with_prefix(&format!("{ns}:scan:")).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![format!("{ns}:scan:a"), format!("{ns}:scan:b")]);

        for suffix in ["scan:a", "scan:b", "other"] {
            store.delete(&format!("{ns}:{suffix}")).await.unwrap();
        }
    }
}
