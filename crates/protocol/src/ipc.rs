//! Messages exchanged between the engine and the outside world.
//!
//! The protocol follows an Operation/Event pattern:
//! - `Op`: control-surface requests sent by a client (API layer, CLI)
//! - `SseMessageRecord`: notifications published to every subscriber of a project
//! - `StepRequest`: queued work handed from one worker to the next
//!
//! All three are JSON on the wire and in the shared store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::document_models::TenderDocument;
use crate::pipeline_models::{DocumentVariant, ProcessingStep};

/// Operations a client can request.
///
/// Uses tagged enum serialization for TypeScript compatibility:
/// ```json
/// {
///   "type": "advance",
///   "payload": { "project_id": "p-42", "step": "analyze_h1" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Op {
    /// Register the uploaded file and run extraction.
    Start { project_id: String, source: String },

    /// Run a specific step. Rejected unless it is the legal next step.
    Advance {
        project_id: String,
        step: ProcessingStep,
    },

    /// Submit the reviewed document. `None` approves the document as produced.
    SubmitReview {
        project_id: String,
        document: Option<TenderDocument>,
    },

    /// Re-run the step that failed.
    Retry { project_id: String },

    GetStatus { project_id: String },

    GetDocument {
        project_id: String,
        variant: DocumentVariant,
    },

    /// Delete everything stored for the project.
    Cleanup { project_id: String },
}

/// Kind of notification carried by an [`SseMessageRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The project entered a new state. Data is the new `AgentState`.
    StateUpdate,
    /// Progress inside a state (no transition).
    Progress,
    /// A step failed; data carries the error message.
    Error,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::StateUpdate => "state_update",
            EventType::Progress => "progress",
            EventType::Error => "error",
        }
    }
}

/// One published notification, as stored in the message history and as
/// delivered to stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct SseMessageRecord {
    #[ts(type = "string")]
    pub message_id: Uuid,

    pub project_id: String,

    pub event_type: EventType,

    #[ts(type = "unknown")]
    pub event_data: Value,

    pub timestamp: DateTime<Utc>,
}

impl SseMessageRecord {
    pub fn new(project_id: impl Into<String>, event_type: EventType, event_data: Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            project_id: project_id.into(),
            event_type,
            event_data,
            timestamp: Utc::now(),
        }
    }
}

/// A queued request to run one step for one project.
///
/// Auto-chaining enqueues these instead of calling the next step directly,
/// so a pending hand-off survives a worker restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct StepRequest {
    #[ts(type = "string")]
    pub request_id: Uuid,

    pub project_id: String,

    pub step: ProcessingStep,

    /// Delivery attempt, starting at 1.
    pub attempt: u32,

    pub enqueued_at: DateTime<Utc>,
}

impl StepRequest {
    pub fn new(project_id: impl Into<String>, step: ProcessingStep) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            project_id: project_id.into(),
            step,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// The same request, queued again after an infrastructure failure.
    pub fn redelivery(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }
}
