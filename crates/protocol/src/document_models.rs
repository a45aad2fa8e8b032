//! Document tree models.
//!
//! The extractor turns an uploaded tender file into a [`TenderDocument`]; every
//! later step reads one and returns a new one with heading nodes inserted or
//! updated.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use ts_rs::TS;

/// What a node represents in the source document.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Paragraph,
    Heading,
    Table,
    List,
    Image,
}

/// Why a heading exists.
///
/// Headings detected from the source text carry their structural role;
/// headings the pipeline synthesizes are marked `Introduction`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum HeadingRole {
    Chapter,
    Section,
    Subsection,
    Introduction,
}

/// A single node of the document tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct DocumentNode {
    pub kind: NodeKind,

    /// Heading level (1 = chapter). Only set on headings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<HeadingRole>,

    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DocumentNode>,

    /// Extractor-specific attributes (style names, numbering ids, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[ts(type = "Record<string, unknown>")]
    pub attrs: BTreeMap<String, Value>,
}

impl DocumentNode {
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Paragraph,
            level: None,
            role: None,
            text: text.into(),
            children: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn heading(level: u8, role: HeadingRole, text: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Heading,
            level: Some(level),
            role: Some(role),
            text: text.into(),
            children: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn is_heading(&self) -> bool {
        self.kind == NodeKind::Heading
    }

    /// Turn this node into a heading in place, keeping text and attributes.
    pub fn promote(&mut self, level: u8, role: HeadingRole) {
        self.kind = NodeKind::Heading;
        self.level = Some(level);
        self.role = Some(role);
    }
}

/// A whole extracted document.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct TenderDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub nodes: Vec<DocumentNode>,
}

impl TenderDocument {
    pub fn new(nodes: Vec<DocumentNode>) -> Self {
        Self { title: None, nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All heading nodes, depth first, in document order.
    pub fn headings(&self) -> Vec<&DocumentNode> {
        fn collect<'a>(nodes: &'a [DocumentNode], out: &mut Vec<&'a DocumentNode>) {
            for node in nodes {
                if node.is_heading() {
                    out.push(node);
                }
                collect(&node.children, out);
            }
        }

        let mut out = Vec::new();
        collect(&self.nodes, &mut out);
        out
    }

    pub fn count_headings(&self, level: u8) -> usize {
        self.headings()
            .iter()
            .filter(|h| h.level == Some(level))
            .count()
    }

    pub fn count_role(&self, role: HeadingRole) -> usize {
        self.headings()
            .iter()
            .filter(|h| h.role == Some(role))
            .count()
    }
}
