//! Extractor for documents that were already converted to JSON.

use crate::collaborators::base::{CollaboratorError, DocumentExtractor};
use async_trait::async_trait;
use std::path::PathBuf;
use tk_protocol::document_models::{DocumentNode, TenderDocument};
use tracing::debug;

/// Reads a JSON document tree from a local path or `file://` URL.
///
/// Accepts either a full `TenderDocument` object or a bare array of nodes.
#[derive(Debug, Clone, Default)]
pub struct JsonFileExtractor;

impl JsonFileExtractor {
    pub fn new() -> Self {
        Self
    }

    fn resolve(source: &str) -> Result<PathBuf, CollaboratorError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(CollaboratorError::InvalidInput("empty source reference".into()));
        }
        let path = match source.strip_prefix("file://") {
            Some(rest) => rest,
            None if source.contains("://") => {
                return Err(CollaboratorError::InvalidInput(format!(
                    "unsupported source scheme: {source}"
                )))
            }
            None => source,
        };
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl DocumentExtractor for JsonFileExtractor {
    async fn extract(&self, source: &str) -> Result<TenderDocument, CollaboratorError> {
        let path = Self::resolve(source)?;
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CollaboratorError::ExtractionFailed(format!("cannot read {}: {e}", path.display()))
        })?;

        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            CollaboratorError::ExtractionFailed(format!("{} is not JSON: {e}", path.display()))
        })?;

        let document = if value.is_array() {
            let nodes: Vec<DocumentNode> = serde_json::from_value(value)
                .map_err(|e| CollaboratorError::ExtractionFailed(e.to_string()))?;
            TenderDocument::new(nodes)
        } else {
            serde_json::from_value(value)
                .map_err(|e| CollaboratorError::ExtractionFailed(e.to_string()))?
        };

        if document.is_empty() {
            return Err(CollaboratorError::ExtractionFailed(format!(
                "{} contains no content",
                path.display()
            )));
        }
        debug!(path = %path.display(), nodes = document.nodes.len(), "document extracted");
        Ok(document)
    }
}
