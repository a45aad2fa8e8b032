//! Runtime project state models.
//!
//! This module defines the structures persisted for every tender project:
//! the current [`AgentState`], references to the document variants it has
//! produced, and the resumable [`StateSnapshot`] that combines both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::pipeline_models::{DisplayStatus, DocumentVariant, PipelineState, ProcessingStep};

/// Points at one stored revision of a document variant.
///
/// The revision changes every time the producing step runs, so a reader can
/// tell whether the variant it loaded is the one the state refers to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
pub struct DocumentRef {
    pub variant: DocumentVariant,

    #[ts(type = "string")]
    pub revision: Uuid,
}

/// The state of a single project at one point in time.
///
/// One value is current per project; every value ever current is also
/// appended to the project's state history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct AgentState {
    pub project_id: String,

    pub current_state: PipelineState,

    /// The step that produced this state, is running in it, or failed in it.
    ///
    /// `None` only for the initial `AWAITING_UPLOAD` state.
    #[serde(default)]
    pub step: Option<ProcessingStep>,

    /// Progress percentage, 0 to 100.
    pub progress: u8,

    /// Human-readable description of what is happening.
    pub message: String,

    /// Failure reason, set only on `FAILED`.
    #[serde(default)]
    pub error: Option<String>,

    /// The document this state produced or carries forward.
    #[serde(default)]
    pub result_document_ref: Option<DocumentRef>,

    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    /// Create a state stamped with the current time.
    pub fn new(
        project_id: impl Into<String>,
        current_state: PipelineState,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            current_state,
            step: None,
            progress: progress.min(100),
            message: message.into(),
            error: None,
            result_document_ref: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: ProcessingStep) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.result_document_ref = Some(document);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.current_state == PipelineState::Failed
    }
}

/// Resumable snapshot of a project.
///
/// Absence of a snapshot means the project was never started (or was cleaned
/// up), not that its state is unknown.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct StateSnapshot {
    pub state: AgentState,

    /// Latest revision of every document variant produced so far.
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
}

impl StateSnapshot {
    pub fn new(state: AgentState) -> Self {
        Self {
            state,
            documents: Vec::new(),
        }
    }

    /// Record a new revision, replacing any older one of the same variant.
    pub fn record_document(&mut self, document: DocumentRef) {
        self.documents.retain(|d| d.variant != document.variant);
        self.documents.push(document);
    }

    pub fn document(&self, variant: DocumentVariant) -> Option<DocumentRef> {
        self.documents.iter().copied().find(|d| d.variant == variant)
    }
}

/// What `get_status` reports about a project.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ProjectStatus {
    pub state: AgentState,

    /// Coarse status derived from `state.current_state`.
    pub display_status: DisplayStatus,

    /// The machine is halted until a caller acts.
    pub requires_input: bool,

    /// The step a caller may request next, if any.
    #[serde(default)]
    pub next_step: Option<ProcessingStep>,

    #[serde(default)]
    pub documents: Vec<DocumentRef>,
}
