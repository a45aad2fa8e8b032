//! A store wrapper that fails selected reads, for transient-error tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tk_core::store::{KvStore, MemoryStore, StoreError, StoreResult};

/// Delegates to a [`MemoryStore`] but fails the next `failures` reads of
/// keys containing `pattern` with a command error.
#[allow(dead_code)]
pub struct FlakyReadStore {
    inner: MemoryStore,
    pattern: String,
    failures: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyReadStore {
    pub fn new(pattern: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            pattern: pattern.to_string(),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` matching reads.
    pub fn fail_reads(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn pending_failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> StoreResult<()> {
        if !key.contains(&self.pattern) {
            return Ok(());
        }
        let armed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            Err(StoreError::Command(format!("read of {key} timed out")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FlakyReadStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.set_nx(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.inner.compare_and_expire(key, expected, ttl).await
    }

    async fn push_capped(
        &self,
        key: &str,
        value: &str,
        cap: usize,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.inner.push_capped(key, value, cap, ttl).await
    }

    async fn list(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check(key)?;
        self.inner.list(key).await
    }

    async fn push_back(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.push_back(key, value).await
    }

    async fn pop_front(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.pop_front(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.keys_with_prefix(prefix).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}
