//! Contracts for the services that do the actual document work.

use async_trait::async_trait;
use thiserror::Error;
use tk_protocol::document_models::TenderDocument;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Collaborator not available: {0}")]
    NotAvailable(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),
}

/// Turns an uploaded file into a document tree.
///
/// Must have no side effects when it fails.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, source: &str) -> Result<TenderDocument, CollaboratorError>;
}

/// Produces a new document from an earlier one.
///
/// Implementations must be idempotent: analyzing an already analyzed
/// document returns it unchanged.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        project_id: &str,
        document: TenderDocument,
    ) -> Result<TenderDocument, CollaboratorError>;
}
