//! Top-level error type for engine operations.

use thiserror::Error;
use tk_protocol::pipeline_models::{DocumentVariant, PipelineState, ProcessingStep};

use crate::collaborators::CollaboratorError;
use crate::config::ConfigError;
use crate::lock::LockError;
use crate::registry::ConfigurationError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The registry or dispatch table is missing an entry. Never retried.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("project {0} has not been started")]
    NotStarted(String),

    /// The requested step is not the legal next step for the current state.
    #[error("project {project_id}: step {step} is not allowed from {state}")]
    InvalidAction {
        project_id: String,
        state: PipelineState,
        step: ProcessingStep,
    },

    /// Retry was requested for a project that is not in a retryable failure.
    #[error("project {project_id} cannot be retried from {state}")]
    NotRetryable {
        project_id: String,
        state: PipelineState,
    },

    #[error(
        "project {project_id}: transition {} -> {to} is not allowed",
        .from.map_or("<none>", PipelineState::as_str)
    )]
    InvalidTransition {
        project_id: String,
        from: Option<PipelineState>,
        to: PipelineState,
    },

    /// A step's business logic failed. The project has been moved to FAILED.
    #[error("project {project_id}: {step} failed: {message}")]
    Processing {
        project_id: String,
        step: ProcessingStep,
        message: String,
    },

    /// A previous run died mid-step. The project has been moved to FAILED.
    #[error("project {project_id} was interrupted while {state}")]
    Interrupted {
        project_id: String,
        state: PipelineState,
    },

    #[error("project {project_id} has no {variant} document")]
    MissingDocument {
        project_id: String,
        variant: DocumentVariant,
    },

    #[error("project {0} has no uploaded source")]
    MissingSource(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl PipelineError {
    /// Infrastructure failures abort without advancing state and are worth
    /// another delivery. Everything else is a final answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Lock(_) | PipelineError::Store(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message_without_origin() {
        let err = PipelineError::InvalidTransition {
            project_id: "p1".into(),
            from: None,
            to: PipelineState::Extracted,
        };
        assert_eq!(
            err.to_string(),
            "project p1: transition <none> -> EXTRACTED is not allowed"
        );
    }

    #[test]
    fn test_only_infrastructure_errors_are_transient() {
        assert!(PipelineError::Store(StoreError::Connection("down".into())).is_transient());
        assert!(PipelineError::Lock(LockError::AcquireFailed {
            key: "k".into(),
            attempts: 3
        })
        .is_transient());
        assert!(!PipelineError::NotStarted("p1".into()).is_transient());
        assert!(!PipelineError::Processing {
            project_id: "p1".into(),
            step: ProcessingStep::Extract,
            message: "bad file".into(),
        }
        .is_transient());
    }
}
