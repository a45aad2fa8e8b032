//! Business logic bound to each processing step.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tk_protocol::document_models::{HeadingRole, TenderDocument};
use tk_protocol::pipeline_models::ProcessingStep;

use crate::collaborators::{CollaboratorError, Collaborators, DocumentAnalyzer, DocumentExtractor};

/// Inputs for one step run.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub project_id: String,
    pub step: ProcessingStep,
    /// Uploaded file reference, for steps that read the source.
    pub source: Option<String>,
    /// Document read from the previous stage or supplied by the caller.
    pub input: Option<TenderDocument>,
}

impl StepContext {
    fn require_source(&self) -> Result<&str, CollaboratorError> {
        self.source
            .as_deref()
            .ok_or_else(|| CollaboratorError::InvalidInput("no source reference".into()))
    }

    fn take_input(&mut self) -> Result<TenderDocument, CollaboratorError> {
        self.input
            .take()
            .ok_or_else(|| CollaboratorError::InvalidInput("no input document".into()))
    }
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, ctx: StepContext) -> Result<TenderDocument, CollaboratorError>;
}

pub type DispatchTable = HashMap<ProcessingStep, Arc<dyn StepHandler>>;

/// One handler per step, wired to the given collaborators.
pub fn dispatch_table(collaborators: &Collaborators) -> DispatchTable {
    let mut table: DispatchTable = HashMap::new();
    table.insert(
        ProcessingStep::Extract,
        Arc::new(ExtractHandler(Arc::clone(&collaborators.extractor))),
    );
    table.insert(
        ProcessingStep::AnalyzeH1,
        Arc::new(AnalyzeHandler(Arc::clone(&collaborators.h1_analyzer))),
    );
    table.insert(
        ProcessingStep::AnalyzeH2h3,
        Arc::new(AnalyzeHandler(Arc::clone(&collaborators.h2h3_analyzer))),
    );
    table.insert(
        ProcessingStep::AddIntroduction,
        Arc::new(AnalyzeHandler(Arc::clone(&collaborators.introduction))),
    );
    table.insert(ProcessingStep::PrepareReview, Arc::new(ReviewGate::default()));
    table.insert(
        ProcessingStep::SubmitReview,
        Arc::new(ReviewGate {
            require_chapters: true,
        }),
    );
    table.insert(ProcessingStep::Finalize, Arc::new(ReviewGate::default()));
    table
}

struct ExtractHandler(Arc<dyn DocumentExtractor>);

#[async_trait]
impl StepHandler for ExtractHandler {
    async fn run(&self, ctx: StepContext) -> Result<TenderDocument, CollaboratorError> {
        self.0.extract(ctx.require_source()?).await
    }
}

struct AnalyzeHandler(Arc<dyn DocumentAnalyzer>);

#[async_trait]
impl StepHandler for AnalyzeHandler {
    async fn run(&self, mut ctx: StepContext) -> Result<TenderDocument, CollaboratorError> {
        let input = ctx.take_input()?;
        self.0.analyze(&ctx.project_id, input).await
    }
}

/// Passes the document through, refusing an empty one.
///
/// At submission it also refuses a document without chapter headings, so a
/// bad review fails on the step that can be resubmitted.
#[derive(Default)]
struct ReviewGate {
    require_chapters: bool,
}

#[async_trait]
impl StepHandler for ReviewGate {
    async fn run(&self, mut ctx: StepContext) -> Result<TenderDocument, CollaboratorError> {
        let document = ctx.take_input()?;
        if document.is_empty() {
            return Err(CollaboratorError::InvalidInput(
                "review document is empty".into(),
            ));
        }
        if self.require_chapters && document.count_role(HeadingRole::Chapter) == 0 {
            return Err(CollaboratorError::InvalidInput(
                "review document has no chapter headings".into(),
            ));
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tk_protocol::document_models::DocumentNode;

    fn ctx(step: ProcessingStep, input: Option<TenderDocument>) -> StepContext {
        StepContext {
            project_id: "p1".into(),
            step,
            source: None,
            input,
        }
    }

    #[test]
    fn test_every_step_has_a_handler() {
        let table = dispatch_table(&Collaborators::builtin());
        for step in ProcessingStep::ALL {
            assert!(table.contains_key(&step), "{step}");
        }
    }

    #[tokio::test]
    async fn test_extract_without_source_is_invalid_input() {
        let table = dispatch_table(&Collaborators::builtin());
        let result = table[&ProcessingStep::Extract]
            .run(ctx(ProcessingStep::Extract, None))
            .await;
        assert!(matches!(result, Err(CollaboratorError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_review_gate_rejects_empty_document() {
        let result = ReviewGate::default()
            .run(ctx(ProcessingStep::PrepareReview, Some(TenderDocument::default())))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_submitted_review_requires_chapters() {
        let table = dispatch_table(&Collaborators::builtin());
        let submit = &table[&ProcessingStep::SubmitReview];

        let flat = TenderDocument::new(vec![DocumentNode::paragraph("x")]);
        let err = submit
            .run(ctx(ProcessingStep::SubmitReview, Some(flat.clone())))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no chapter headings"));

        // Preparing the review only needs a non-empty document.
        assert!(table[&ProcessingStep::PrepareReview]
            .run(ctx(ProcessingStep::PrepareReview, Some(flat)))
            .await
            .is_ok());

        let chaptered =
            TenderDocument::new(vec![DocumentNode::heading(1, HeadingRole::Chapter, "1 Scope")]);
        assert!(submit
            .run(ctx(ProcessingStep::SubmitReview, Some(chaptered)))
            .await
            .is_ok());
    }
}
