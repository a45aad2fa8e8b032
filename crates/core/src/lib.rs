//! # tk-core
//!
//! Orchestration engine for tender-kit.
//!
//! This crate provides:
//! - Configuration loading from the `.tender-kit/` directory
//! - A declarative state registry for the tender pipeline
//! - Store backends (Redis and in-memory) and the per-project cache layer
//! - A distributed lock for per-project mutual exclusion
//! - Event recording and live fan-out
//! - The state manager, step executor, step queue and worker
//! - Rule-based document collaborators
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`registry`]: State and step tables
//! - [`store`]: Key-value store abstraction and backends
//! - [`cache`]: Per-project keys, documents and histories
//! - [`lock`]: Distributed lock
//! - [`events`]: Event publisher and buses
//! - [`state`]: Validated, persisted transitions
//! - [`engine`]: Step execution and recovery
//! - [`queue`] / [`worker`]: Auto-chaining hand-off
//! - [`service`]: Control surface
//! - [`collaborators`]: Extractor and analyzer contracts
//! - [`runtime`]: Component wiring

pub mod cache;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lock;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod state;
pub mod store;
pub mod worker;

pub use error::{PipelineError, PipelineResult};
pub use runtime::Engine;
pub use service::PipelineService;
