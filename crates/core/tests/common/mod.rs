//! Common test utilities and helpers for E2E tests.
//!
//! This module provides shared functionality across all E2E tests including:
//! - Test fixtures (an in-memory engine, sample tender files)
//! - Custom assertions
//! - Mock collaborators and step handlers
//! - A store that fails selected reads

pub mod assertions;
pub mod fixtures;
pub mod flaky_store;
pub mod mock_collaborators;

pub use assertions::*;
pub use fixtures::*;
#[allow(unused_imports)]
pub use flaky_store::*;
#[allow(unused_imports)]
pub use mock_collaborators::*;
