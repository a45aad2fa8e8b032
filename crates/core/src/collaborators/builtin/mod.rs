//! Collaborators that run locally without external services.

mod heading_analyzer;
mod introduction;
mod json_extractor;

pub use heading_analyzer::{HeadingPass, NumberedHeadingAnalyzer};
pub use introduction::IntroductionInjector;
pub use json_extractor::JsonFileExtractor;
