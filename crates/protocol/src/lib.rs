//! # tk-protocol
//!
//! Core protocol definitions and data models for tender-kit.
//!
//! This crate defines all shared data structures used for:
//! - The pipeline state machine vocabulary (states, steps, document variants)
//! - Persisted project state and resumable snapshots
//! - The document tree exchanged with extractors and analyzers
//! - Control operations, published events and queued step requests
//!
//! ## Modules
//!
//! - [`pipeline_models`]: States, steps, document variants
//! - [`process_models`]: Runtime project state and snapshots
//! - [`document_models`]: Tender document tree
//! - [`ipc`]: Operations, events and step requests
//!
//! ## Design Principles
//!
//! - Minimal dependencies: Only serde, ts-rs, uuid and chrono
//! - TypeScript generation: All types derive `TS` for client compatibility
//! - Independent compilation: No dependencies on other tender-kit crates

pub mod document_models;
pub mod ipc;
pub mod pipeline_models;
pub mod process_models;

// Re-export all public types for convenience
pub use document_models::*;
pub use ipc::*;
pub use pipeline_models::*;
pub use process_models::*;
