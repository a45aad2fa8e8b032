//! Pipeline state machine vocabulary.
//!
//! This module defines the states a tender project moves through, the
//! processing steps that move it, and the document variants those steps
//! produce. The transition rules themselves live in the core registry; these
//! types only name things.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

/// Every state a project can be in.
///
/// The normal flow is:
/// AwaitingUpload -> Extracting -> Extracted -> AnalyzingH1 -> H1Analyzed
/// -> AnalyzingH2h3 -> H2h3Analyzed -> AddingIntro -> IntroAdded
/// -> AwaitingReview -> Reviewed -> Completed
///
/// `Failed` can be entered from any non-terminal state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Project initialized, waiting for the document to be extracted.
    AwaitingUpload,
    Extracting,
    Extracted,
    AnalyzingH1,
    H1Analyzed,
    AnalyzingH2h3,
    H2h3Analyzed,
    AddingIntro,
    IntroAdded,

    /// Halted until a user submits (or approves) the structured document.
    AwaitingReview,
    Reviewed,
    Completed,

    /// A step failed or was interrupted. `AgentState::error` holds the reason.
    Failed,
}

impl PipelineState {
    /// All states, in pipeline order.
    pub const ALL: [PipelineState; 13] = [
        PipelineState::AwaitingUpload,
        PipelineState::Extracting,
        PipelineState::Extracted,
        PipelineState::AnalyzingH1,
        PipelineState::H1Analyzed,
        PipelineState::AnalyzingH2h3,
        PipelineState::H2h3Analyzed,
        PipelineState::AddingIntro,
        PipelineState::IntroAdded,
        PipelineState::AwaitingReview,
        PipelineState::Reviewed,
        PipelineState::Completed,
        PipelineState::Failed,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::AwaitingUpload => "AWAITING_UPLOAD",
            PipelineState::Extracting => "EXTRACTING",
            PipelineState::Extracted => "EXTRACTED",
            PipelineState::AnalyzingH1 => "ANALYZING_H1",
            PipelineState::H1Analyzed => "H1_ANALYZED",
            PipelineState::AnalyzingH2h3 => "ANALYZING_H2H3",
            PipelineState::H2h3Analyzed => "H2H3_ANALYZED",
            PipelineState::AddingIntro => "ADDING_INTRO",
            PipelineState::IntroAdded => "INTRO_ADDED",
            PipelineState::AwaitingReview => "AWAITING_REVIEW",
            PipelineState::Reviewed => "REVIEWED",
            PipelineState::Completed => "COMPLETED",
            PipelineState::Failed => "FAILED",
        }
    }

    /// Terminal states have no successor of any kind, FAILED included.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        PipelineState::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| format!("unknown pipeline state: {s}"))
    }
}

/// A unit of work that moves a project from one state to another.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    /// Convert the uploaded file into a JSON document tree.
    Extract,
    /// Tag chapter (level-1) headings.
    AnalyzeH1,
    /// Tag section and subsection (level-2/3) headings.
    AnalyzeH2h3,
    /// Insert an introduction heading under each chapter.
    AddIntroduction,
    /// Hand the structured document over for user review.
    PrepareReview,
    /// Accept the (possibly edited) document from the reviewer.
    SubmitReview,
    /// Seal the reviewed document.
    Finalize,
}

impl ProcessingStep {
    pub const ALL: [ProcessingStep; 7] = [
        ProcessingStep::Extract,
        ProcessingStep::AnalyzeH1,
        ProcessingStep::AnalyzeH2h3,
        ProcessingStep::AddIntroduction,
        ProcessingStep::PrepareReview,
        ProcessingStep::SubmitReview,
        ProcessingStep::Finalize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStep::Extract => "extract",
            ProcessingStep::AnalyzeH1 => "analyze_h1",
            ProcessingStep::AnalyzeH2h3 => "analyze_h2h3",
            ProcessingStep::AddIntroduction => "add_introduction",
            ProcessingStep::PrepareReview => "prepare_review",
            ProcessingStep::SubmitReview => "submit_review",
            ProcessingStep::Finalize => "finalize",
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        ProcessingStep::ALL
            .into_iter()
            .find(|step| step.as_str() == wanted)
            .ok_or_else(|| format!("unknown processing step: {s}"))
    }
}

/// Named stage outputs of the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
pub enum DocumentVariant {
    Raw,
    H1Tagged,
    H2h3Tagged,
    IntroAdded,
    Final,
}

impl DocumentVariant {
    pub const ALL: [DocumentVariant; 5] = [
        DocumentVariant::Raw,
        DocumentVariant::H1Tagged,
        DocumentVariant::H2h3Tagged,
        DocumentVariant::IntroAdded,
        DocumentVariant::Final,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentVariant::Raw => "raw",
            DocumentVariant::H1Tagged => "h1_tagged",
            DocumentVariant::H2h3Tagged => "h2h3_tagged",
            DocumentVariant::IntroAdded => "intro_added",
            DocumentVariant::Final => "final",
        }
    }
}

impl fmt::Display for DocumentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        DocumentVariant::ALL
            .into_iter()
            .find(|variant| variant.as_str() == wanted)
            .ok_or_else(|| format!("unknown document variant: {s}"))
    }
}

/// Coarse, user-facing status derived from a [`PipelineState`].
///
/// Clients that only need "is it done yet" read this instead of the full
/// state enum. It is never stored.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Pending,
    Processing,
    AwaitingReview,
    Completed,
    Failed,
}
