//! External document services.
//!
//! The engine only sees the [`DocumentExtractor`] and [`DocumentAnalyzer`]
//! traits. [`builtin`] holds rule-based implementations so the engine runs
//! end to end without an extraction service or an LLM.

pub mod base;
pub mod builtin;

pub use base::{CollaboratorError, DocumentAnalyzer, DocumentExtractor};

use std::sync::Arc;

/// The set of services one engine uses.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn DocumentExtractor>,
    pub h1_analyzer: Arc<dyn DocumentAnalyzer>,
    pub h2h3_analyzer: Arc<dyn DocumentAnalyzer>,
    pub introduction: Arc<dyn DocumentAnalyzer>,
}

impl Collaborators {
    pub fn builtin() -> Self {
        Self {
            extractor: Arc::new(builtin::JsonFileExtractor::new()),
            h1_analyzer: Arc::new(builtin::NumberedHeadingAnalyzer::chapters()),
            h2h3_analyzer: Arc::new(builtin::NumberedHeadingAnalyzer::sections()),
            introduction: Arc::new(builtin::IntroductionInjector::new()),
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::builtin()
    }
}
