//! Per-project mutual exclusion over the shared store.
//!
//! A lock is a store key holding a random token with an expiry. Acquisition
//! is `SET NX` with that expiry; release and extension are check-and-act
//! operations on the token, so a holder whose lock already expired can never
//! free or prolong a lock that now belongs to someone else.
//!
//! Expiry is the liveness guarantee: a holder that dies without releasing
//! blocks others for at most the lock TTL.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{KvStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Every acquisition attempt found the lock held.
    #[error("could not acquire lock {key} after {attempts} attempts")]
    AcquireFailed { key: String, attempts: u32 },

    /// The acquisition budget ran out before the lock was free.
    #[error("timed out after {elapsed:?} waiting for lock {key}")]
    Timeout { key: String, elapsed: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type LockResult<T> = Result<T, LockError>;

/// Wait between acquisition attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the `attempt`-th failed attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    pub ttl: Duration,
    /// Attempts after the first one.
    pub retries: u32,
    pub backoff: Backoff,
    /// Overall acquisition budget. `None` relies on `retries` alone.
    pub timeout: Option<Duration>,
    /// Keep-alive period while held. `None` relies on `ttl` alone.
    pub extend_interval: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        crate::config::LockConfig::default().to_options()
    }
}

/// Factory for project locks over one store.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    options: LockOptions,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, options: LockOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// One acquisition attempt. `None` means someone else holds the lock.
    pub async fn try_acquire(&self, key: &str) -> LockResult<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        if self.store.set_nx(key, &token, self.options.ttl).await? {
            debug!(key, "lock acquired");
            Ok(Some(LockGuard {
                store: Arc::clone(&self.store),
                key: key.to_string(),
                token,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Acquire `key`, retrying with backoff until the retry count or the
    /// timeout is exhausted.
    ///
    /// # Errors
    ///
    /// - [`LockError::AcquireFailed`] when every attempt found the lock held
    /// - [`LockError::Timeout`] when the wall-clock budget ran out first
    /// - [`LockError::Store`] when the store itself failed
    pub async fn acquire(&self, key: &str) -> LockResult<LockGuard> {
        let started = Instant::now();
        let attempts = self.options.retries.saturating_add(1);

        for attempt in 0..attempts {
            if let Some(guard) = self.try_acquire(key).await? {
                return Ok(guard);
            }
            if attempt + 1 == attempts {
                break;
            }

            let delay = self.options.backoff.delay(attempt);
            if let Some(timeout) = self.options.timeout {
                let elapsed = started.elapsed();
                if elapsed + delay > timeout {
                    return Err(LockError::Timeout {
                        key: key.to_string(),
                        elapsed,
                    });
                }
            }
            debug!(key, attempt, ?delay, "lock busy, backing off");
            tokio::time::sleep(delay).await;
        }

        Err(LockError::AcquireFailed {
            key: key.to_string(),
            attempts,
        })
    }

    /// Run `f` while holding `key`.
    ///
    /// The lock is released on every exit path of `f`. When an extend
    /// interval is configured, a keep-alive task prolongs the lock until `f`
    /// returns.
    pub async fn with_lock<F, Fut, T, E>(&self, key: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire(key).await?;
        let keepalive = self
            .options
            .extend_interval
            .map(|every| guard.spawn_keepalive(every, self.options.ttl));

        let result = f().await;

        if let Some(handle) = keepalive {
            handle.abort();
        }
        match guard.release().await {
            Ok(true) => {}
            Ok(false) => warn!(key, "lock expired before release"),
            Err(e) => warn!(key, error = %e, "failed to release lock"),
        }
        result
    }
}

/// A held lock. Dropping it without calling [`LockGuard::release`] releases
/// it in a background task.
pub struct LockGuard {
    store: Arc<dyn KvStore>,
    key: String,
    token: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock. Returns `false` if it had already expired or
    /// changed hands.
    pub async fn release(mut self) -> LockResult<bool> {
        self.released = true;
        let released = self
            .store
            .compare_and_delete(&self.key, &self.token)
            .await?;
        debug!(key = %self.key, released, "lock released");
        Ok(released)
    }

    /// Reset the expiry. Returns `false` if the lock is no longer ours.
    pub async fn extend(&self, ttl: Duration) -> LockResult<bool> {
        Ok(self
            .store
            .compare_and_expire(&self.key, &self.token, ttl)
            .await?)
    }

    fn spawn_keepalive(&self, every: Duration, ttl: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let token = self.token.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                match store.compare_and_expire(&key, &token, ttl).await {
                    Ok(true) => debug!(%key, "lock extended"),
                    Ok(false) => {
                        warn!(%key, "lock lost while held");
                        break;
                    }
                    Err(e) => warn!(%key, error = %e, "lock extension failed"),
                }
            }
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = store.compare_and_delete(&key, &token).await {
                warn!(%key, error = %e, "failed to release dropped lock");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn options(ttl_ms: u64, retries: u32) -> LockOptions {
        LockOptions {
            ttl: Duration::from_millis(ttl_ms),
            retries,
            backoff: Backoff::Fixed(Duration::from_millis(5)),
            timeout: None,
            extend_interval: None,
        }
    }

    fn lock(opts: LockOptions) -> DistributedLock {
        DistributedLock::new(Arc::new(MemoryStore::new()), opts)
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(10),
            max: Duration::from_millis(50),
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(40));
        assert_eq!(backoff.delay(3), Duration::from_millis(50));
        assert_eq!(backoff.delay(40), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_second_holder_is_refused() {
        let lock = lock(options(10_000, 0));
        let _held = lock.try_acquire("p1").await.unwrap().unwrap();

        assert!(lock.try_acquire("p1").await.unwrap().is_none());
        assert!(lock.try_acquire("p2").await.unwrap().is_some());
        assert_eq!(
            lock.acquire("p1").await.unwrap_err(),
            LockError::AcquireFailed {
                key: "p1".into(),
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_with_lock_serializes_critical_sections() {
        let lock = lock(options(10_000, 200));
        let inside = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let inside = Arc::clone(&inside);
            let entered = Arc::clone(&entered);
            tasks.push(tokio::spawn(async move {
                lock.with_lock("shared", || async {
                    assert!(!inside.swap(true, Ordering::SeqCst), "overlapping holders");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.store(false, Ordering::SeqCst);
                    entered.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, LockError>(())
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(entered.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let lock = lock(options(10_000, 0));
        let result: Result<(), LockError> = lock
            .with_lock("p1", || async {
                Err(LockError::Store(StoreError::Command("boom".into())))
            })
            .await;
        assert!(result.is_err());
        assert!(lock.try_acquire("p1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_lock_expires() {
        let lock = lock(options(100, 0));
        let guard = lock.try_acquire("p1").await.unwrap().unwrap();
        std::mem::forget(guard);

        assert!(lock.try_acquire("p1").await.unwrap().is_none());
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(lock.try_acquire("p1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_holder_cannot_release_new_owner() {
        let lock = lock(options(100, 0));
        let stale = lock.try_acquire("p1").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        let _owner = lock.try_acquire("p1").await.unwrap().unwrap();
        assert!(!stale.extend(Duration::from_secs(10)).await.unwrap());
        assert!(!stale.release().await.unwrap());
        assert!(lock.try_acquire("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_guard_is_released() {
        let lock = lock(options(10_000, 0));
        drop(lock.try_acquire("p1").await.unwrap().unwrap());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(lock.try_acquire("p1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let mut opts = options(60_000, 1_000);
        opts.backoff = Backoff::Fixed(Duration::from_millis(100));
        opts.timeout = Some(Duration::from_millis(350));
        let lock = lock(opts);
        let _held = lock.try_acquire("p1").await.unwrap().unwrap();

        match lock.acquire("p1").await {
            Err(LockError::Timeout { key, elapsed }) => {
                assert_eq!(key, "p1");
                assert!(elapsed <= Duration::from_millis(350));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_outlives_ttl() {
        let mut opts = options(100, 0);
        opts.extend_interval = Some(Duration::from_millis(40));
        let lock = lock(opts);
        let contender = lock.clone();

        lock.with_lock("p1", || async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(contender.try_acquire("p1").await.unwrap().is_none());
            Ok::<_, LockError>(())
        })
        .await
        .unwrap();

        assert!(contender.try_acquire("p1").await.unwrap().is_some());
    }
}
