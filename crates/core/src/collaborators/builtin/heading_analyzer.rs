//! Rule-based heading detection from numbering patterns.

use crate::collaborators::base::{CollaboratorError, DocumentAnalyzer};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tk_protocol::document_models::{DocumentNode, HeadingRole, NodeKind, TenderDocument};
use tracing::debug;

/// Longest text still considered a heading rather than a numbered paragraph.
const MAX_HEADING_CHARS: usize = 80;

static CHAPTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:第[一二三四五六七八九十百零〇\d]+[章篇部]",
        r"|(?i:chapter|part)\s+[\dIVXLC]+\b",
        r"|\d{1,2}(?:、|\.\s+|\s+)\S)",
    ))
    .expect("valid regex")
});

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,2}\.\d{1,2}(\.\d{1,2})?(?:\.|、|\s|$)").expect("valid regex")
});

static CN_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^第[一二三四五六七八九十百零〇\d]+节").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingPass {
    /// Level-1 chapter headings.
    Chapters,
    /// Level-2 sections and level-3 subsections.
    Sections,
}

/// Promotes paragraphs to headings when their text starts with a chapter or
/// section number.
#[derive(Debug, Clone)]
pub struct NumberedHeadingAnalyzer {
    pass: HeadingPass,
}

impl NumberedHeadingAnalyzer {
    pub fn chapters() -> Self {
        Self {
            pass: HeadingPass::Chapters,
        }
    }

    pub fn sections() -> Self {
        Self {
            pass: HeadingPass::Sections,
        }
    }

    fn classify(&self, node: &DocumentNode) -> Option<(u8, HeadingRole)> {
        let untagged = match node.kind {
            NodeKind::Paragraph => true,
            NodeKind::Heading => node.role.is_none(),
            _ => false,
        };
        if !untagged {
            return None;
        }

        // Headings the extractor already leveled only need a role.
        if node.kind == NodeKind::Heading {
            return match (self.pass, node.level) {
                (HeadingPass::Chapters, Some(1)) => Some((1, HeadingRole::Chapter)),
                (HeadingPass::Sections, Some(2)) => Some((2, HeadingRole::Section)),
                (HeadingPass::Sections, Some(3)) => Some((3, HeadingRole::Subsection)),
                (_, Some(_)) => None,
                (_, None) => self.classify_text(&node.text),
            };
        }
        self.classify_text(&node.text)
    }

    fn classify_text(&self, text: &str) -> Option<(u8, HeadingRole)> {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_HEADING_CHARS {
            return None;
        }
        match self.pass {
            HeadingPass::Chapters => CHAPTER_RE
                .is_match(text)
                .then_some((1, HeadingRole::Chapter)),
            HeadingPass::Sections => {
                if let Some(caps) = SECTION_RE.captures(text) {
                    return Some(if caps.get(1).is_some() {
                        (3, HeadingRole::Subsection)
                    } else {
                        (2, HeadingRole::Section)
                    });
                }
                CN_SECTION_RE
                    .is_match(text)
                    .then_some((2, HeadingRole::Section))
            }
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for NumberedHeadingAnalyzer {
    async fn analyze(
        &self,
        project_id: &str,
        mut document: TenderDocument,
    ) -> Result<TenderDocument, CollaboratorError> {
        let mut promoted = 0usize;
        for node in &mut document.nodes {
            if let Some((level, role)) = self.classify(node) {
                node.promote(level, role);
                promoted += 1;
            }
        }

        if self.pass == HeadingPass::Chapters && document.count_role(HeadingRole::Chapter) == 0 {
            return Err(CollaboratorError::AnalysisFailed(
                "no chapter headings detected".into(),
            ));
        }
        debug!(project_id, pass = ?self.pass, promoted, "headings tagged");
        Ok(document)
    }
}
