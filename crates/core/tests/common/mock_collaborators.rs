//! Mock collaborators for deterministic failure testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tk_core::collaborators::builtin::NumberedHeadingAnalyzer;
use tk_core::collaborators::{CollaboratorError, Collaborators, DocumentAnalyzer};
use tk_core::engine::{StepContext, StepHandler};
use tk_protocol::document_models::TenderDocument;

/// An analyzer that always fails with a predefined error.
#[allow(dead_code)]
pub struct MockFailureAnalyzer {
    pub error_message: String,
}

impl MockFailureAnalyzer {
    #[allow(dead_code)]
    pub fn new(error_message: &str) -> Self {
        Self {
            error_message: error_message.to_string(),
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for MockFailureAnalyzer {
    async fn analyze(
        &self,
        _project_id: &str,
        _document: TenderDocument,
    ) -> Result<TenderDocument, CollaboratorError> {
        Err(CollaboratorError::AnalysisFailed(self.error_message.clone()))
    }
}

/// Fails the first `failures` calls, then delegates to the chapter analyzer.
#[allow(dead_code)]
pub struct FlakyChapterAnalyzer {
    failures: usize,
    calls: AtomicUsize,
    inner: NumberedHeadingAnalyzer,
}

impl FlakyChapterAnalyzer {
    #[allow(dead_code)]
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            inner: NumberedHeadingAnalyzer::chapters(),
        }
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentAnalyzer for FlakyChapterAnalyzer {
    async fn analyze(
        &self,
        project_id: &str,
        document: TenderDocument,
    ) -> Result<TenderDocument, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CollaboratorError::NotAvailable(format!(
                "analysis service unavailable (call {})",
                call + 1
            )));
        }
        self.inner.analyze(project_id, document).await
    }
}

/// Built-in collaborators with the level-1 analyzer replaced.
#[allow(dead_code)]
pub fn collaborators_with_h1(analyzer: Arc<dyn DocumentAnalyzer>) -> Collaborators {
    Collaborators {
        h1_analyzer: analyzer,
        ..Collaborators::builtin()
    }
}

/// A step handler that always fails and counts its runs.
#[allow(dead_code)]
pub struct RejectingHandler {
    pub error_message: String,
    runs: AtomicUsize,
}

#[allow(dead_code)]
impl RejectingHandler {
    pub fn new(error_message: &str) -> Self {
        Self {
            error_message: error_message.to_string(),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepHandler for RejectingHandler {
    async fn run(&self, ctx: StepContext) -> Result<TenderDocument, CollaboratorError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Err(CollaboratorError::NotAvailable(format!(
            "{} ({}, run {run})",
            self.error_message, ctx.step
        )))
    }
}
