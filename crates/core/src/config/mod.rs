//! Configuration loading and management.
//!
//! This module loads engine settings from the `.tender-kit/` directory and
//! provides the defaults used when no file is present.

pub mod error;
pub mod loader;
pub mod models;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use models::{
    BackoffKind, CacheConfig, EngineConfig, LockConfig, StoreBackend, StoreConfig, WorkerConfig,
};
