//! Configuration models for `.tender-kit/config.toml`.
//!
//! Every section and field has a default, so an empty (or missing) file
//! yields a working in-memory setup.
//!
//! # Example
//!
//! ```toml
//! [store]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379/0"
//!
//! [cache]
//! ttl_secs = 900
//! state_history_limit = 50
//!
//! [lock]
//! backoff = "exponential"
//! retries = 10
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lock::{Backoff, LockOptions};

/// Unified engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Which backing store holds shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local store. State is lost on exit.
    #[default]
    Memory,
    Redis,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL, required when `backend = "redis"`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prepended to every key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    "tender".into()
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Expiry applied to every project key on write.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_state_history_limit")]
    pub state_history_limit: usize,

    #[serde(default = "default_message_history_limit")]
    pub message_history_limit: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            state_history_limit: default_state_history_limit(),
            message_history_limit: default_message_history_limit(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    900
}
fn default_state_history_limit() -> usize {
    50
}
fn default_message_history_limit() -> usize {
    200
}

/// Backoff strategy name as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// `[lock]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock expiry. Must outlive a normal step or be paired with `extend_interval_ms`.
    #[serde(default = "default_lock_ttl_ms")]
    pub ttl_ms: u64,

    #[serde(default = "default_lock_retries")]
    pub retries: u32,

    #[serde(default)]
    pub backoff: BackoffKind,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Wall-clock budget for acquisition. `0` disables it.
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    /// Keep-alive period while the lock is held. `0` disables it.
    #[serde(default = "default_extend_interval_ms")]
    pub extend_interval_ms: u64,
}

impl LockConfig {
    pub fn to_options(&self) -> LockOptions {
        let base = Duration::from_millis(self.base_delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_millis(self.max_delay_ms),
            },
        };

        LockOptions {
            ttl: Duration::from_millis(self.ttl_ms),
            retries: self.retries,
            backoff,
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            extend_interval: (self.extend_interval_ms > 0)
                .then(|| Duration::from_millis(self.extend_interval_ms)),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_lock_ttl_ms(),
            retries: default_lock_retries(),
            backoff: BackoffKind::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_ms: default_lock_timeout_ms(),
            extend_interval_ms: default_extend_interval_ms(),
        }
    }
}

fn default_lock_ttl_ms() -> u64 {
    60_000
}
fn default_lock_retries() -> u32 {
    20
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_lock_timeout_ms() -> u64 {
    30_000
}
fn default_extend_interval_ms() -> u64 {
    20_000
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between queue polls when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deliveries of one request before it is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause before an auto-chained step is picked up.
    #[serde(default = "default_chain_delay_ms")]
    pub chain_delay_ms: u64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn chain_delay(&self) -> Duration {
        Duration::from_millis(self.chain_delay_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            chain_delay_ms: default_chain_delay_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    200
}
fn default_max_attempts() -> u32 {
    3
}
fn default_chain_delay_ms() -> u64 {
    10
}
