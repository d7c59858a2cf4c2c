//! Bridge from rig-core completion models to [`LanguageModel`].

use async_trait::async_trait;
use rig::agent::{Agent, AgentBuilder};
use rig::completion::{CompletionModel, Prompt};

use crate::error::LlmError;
use crate::llm::LanguageModel;

/// Sampling temperature for extraction (near-deterministic).
const EXTRACTION_TEMPERATURE: f64 = 0.3;

/// Wraps a rig agent built around a single completion model.
pub struct RigAdapter<M: CompletionModel> {
    agent: Agent<M>,
    provider: String,
    model_name: String,
}

impl<M: CompletionModel + 'static> RigAdapter<M> {
    pub fn new(model: M, provider: &str, model_name: &str) -> Self {
        let agent = AgentBuilder::new(model)
            .temperature(EXTRACTION_TEMPERATURE)
            .build();
        Self {
            agent,
            provider: provider.to_string(),
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M: CompletionModel + 'static> LanguageModel for RigAdapter<M> {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.clone(),
                reason: e.to_string(),
            })
    }
}
