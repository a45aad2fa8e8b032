//! Transition requests.
//!
//! A [`Transition`] describes one move of a project's state machine: where
//! it goes, what it says about itself, and which document it produced or
//! carries forward. The [`StateManager`](super::manager::StateManager)
//! validates and applies it.

use tk_protocol::document_models::TenderDocument;
use tk_protocol::pipeline_models::{DocumentVariant, PipelineState, ProcessingStep};
use tk_protocol::process_models::DocumentRef;

/// Document attached to a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionDocument {
    /// A new result, stored under the variant if the target state persists.
    Produced {
        variant: DocumentVariant,
        document: TenderDocument,
    },
    /// An already stored revision the new state points at.
    Carried(DocumentRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub target: PipelineState,
    pub step: Option<ProcessingStep>,
    /// `None` takes the registry default (or keeps the last value on FAILED).
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub document: Option<TransitionDocument>,
    /// A transition carrying an error always lands in FAILED.
    pub error: Option<String>,
}

impl Transition {
    pub fn to(target: PipelineState) -> Self {
        Self {
            target,
            step: None,
            progress: None,
            message: None,
            document: None,
            error: None,
        }
    }

    /// A failure of `step` (if known) with `reason`.
    pub fn failed(step: Option<ProcessingStep>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            step,
            message: Some(reason.clone()),
            error: Some(reason),
            ..Self::to(PipelineState::Failed)
        }
    }

    pub fn step(mut self, step: ProcessingStep) -> Self {
        self.step = Some(step);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn produced(mut self, variant: DocumentVariant, document: TenderDocument) -> Self {
        self.document = Some(TransitionDocument::Produced { variant, document });
        self
    }

    pub fn carried(mut self, document: DocumentRef) -> Self {
        self.document = Some(TransitionDocument::Carried(document));
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// The state this transition actually lands in.
    pub fn effective_target(&self) -> PipelineState {
        if self.error.is_some() {
            PipelineState::Failed
        } else {
            self.target
        }
    }
}
