//! Confidence-based arbitration between the two extractors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::extract::llm::LlmExtractor;
use crate::extract::model::CandidateEvent;
use crate::extract::rules::PatternExtractor;

/// Below this the deterministic result is not trusted on its own.
pub const ARBITRATION_THRESHOLD: f32 = 0.6;

/// Anything that turns message text into at most one candidate.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Option<CandidateEvent>;
}

#[async_trait]
impl Extractor for PatternExtractor {
    async fn extract(&self, text: &str) -> Option<CandidateEvent> {
        PatternExtractor::extract(self, text)
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, text: &str) -> Option<CandidateEvent> {
        LlmExtractor::extract(self, text).await
    }
}

/// Runs the cheap extractor first and the expensive one only when needed.
pub struct Arbiter {
    deterministic: Arc<dyn Extractor>,
    probabilistic: Arc<dyn Extractor>,
}

impl Arbiter {
    pub fn new(deterministic: Arc<dyn Extractor>, probabilistic: Arc<dyn Extractor>) -> Self {
        Self {
            deterministic,
            probabilistic,
        }
    }

    /// Pick at most one candidate for `text`.
    pub async fn decide(&self, text: &str) -> Option<CandidateEvent> {
        let pattern = self.deterministic.extract(text).await;

        if let Some(ref candidate) = pattern
            && candidate.confidence() >= ARBITRATION_THRESHOLD
        {
            debug!(confidence = candidate.confidence(), "Pattern result accepted");
            return pattern;
        }

        let llm = self.probabilistic.extract(text).await;

        match (pattern, llm) {
            (None, llm) => llm,
            (Some(p), Some(l)) if l.confidence() > p.confidence() => {
                debug!(
                    pattern = p.confidence(),
                    llm = l.confidence(),
                    "LLM result outranks pattern result"
                );
                Some(l)
            }
            (Some(p), _) => Some(p),
        }
    }
}
