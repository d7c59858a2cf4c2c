//! Event extraction: filter, deterministic and probabilistic extractors,
//! and the arbitration that picks between them.

pub mod arbiter;
pub mod dates;
pub mod filter;
pub mod llm;
pub mod model;
pub mod rules;

pub use arbiter::{ARBITRATION_THRESHOLD, Arbiter, Extractor};
pub use filter::ContentFilter;
pub use llm::LlmExtractor;
pub use model::{CandidateEvent, EventKind, ExtractionSource};
pub use rules::PatternExtractor;
