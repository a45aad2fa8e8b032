//! Inserts an introduction heading at the top of every chapter.

use crate::collaborators::base::{CollaboratorError, DocumentAnalyzer};
use async_trait::async_trait;
use serde_json::Value;
use tk_protocol::document_models::{DocumentNode, HeadingRole, TenderDocument};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct IntroductionInjector;

impl IntroductionInjector {
    pub fn new() -> Self {
        Self
    }

    fn introduction_for(chapter: &DocumentNode) -> DocumentNode {
        let mut node = DocumentNode::heading(
            2,
            HeadingRole::Introduction,
            format!("Introduction: {}", chapter.text.trim()),
        );
        node.attrs.insert("generated".into(), Value::Bool(true));
        node
    }
}

#[async_trait]
impl DocumentAnalyzer for IntroductionInjector {
    async fn analyze(
        &self,
        project_id: &str,
        document: TenderDocument,
    ) -> Result<TenderDocument, CollaboratorError> {
        if document.count_role(HeadingRole::Chapter) == 0 {
            return Err(CollaboratorError::InvalidInput(
                "document has no chapter headings to introduce".into(),
            ));
        }

        let TenderDocument { title, nodes } = document;
        let mut out = Vec::with_capacity(nodes.len() * 2);
        let mut inserted = 0usize;
        let mut iter = nodes.into_iter().peekable();

        while let Some(node) = iter.next() {
            let is_chapter = node.role == Some(HeadingRole::Chapter);
            let intro = is_chapter.then(|| Self::introduction_for(&node));
            out.push(node);

            let has_intro = iter
                .peek()
                .is_some_and(|next| next.role == Some(HeadingRole::Introduction));
            if let Some(intro) = intro.filter(|_| !has_intro) {
                out.push(intro);
                inserted += 1;
            }
        }

        debug!(project_id, inserted, "introductions added");
        Ok(TenderDocument { title, nodes: out })
    }
}
