//! Project state management.
//!
//! This module provides:
//! - [`Transition`]: a requested move of the state machine
//! - [`StateManager`]: validates transitions and persists their results

pub mod manager;
pub mod process;

pub use manager::StateManager;
pub use process::{Transition, TransitionDocument};
