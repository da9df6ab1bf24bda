use std::sync::Arc;

use async_trait::async_trait;
use parley_memory::error::MemoryError;
use parley_memory::types::{StoredMessage, Summarizer};

use crate::provider::{CompletionRequest, ModelClient, PromptMessage};

const SUMMARY_SYSTEM_PROMPT: &str = "\
You maintain a running summary of a conversation. Fold the new turns into \
the existing summary. Keep it compact and factual; preserve names, \
decisions, and open questions. Respond with the updated summary only.";

/// Model-backed summarizer for the rolling-summary strategy.
pub struct ModelSummarizer {
    model: Arc<dyn ModelClient>,
    max_tokens: u32,
}

impl ModelSummarizer {
    pub fn new(model: Arc<dyn ModelClient>, max_tokens: u32) -> Self {
        Self { model, max_tokens }
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(
        &self,
        previous_summary: Option<&str>,
        evicted: &[StoredMessage],
    ) -> parley_memory::error::Result<String> {
        let mut prompt = String::new();
        if let Some(prev) = previous_summary {
            prompt.push_str("Existing summary:\n");
            prompt.push_str(prev);
            prompt.push_str("\n\n");
        }
        prompt.push_str("New turns to fold in:\n");
        for msg in evicted {
            prompt.push_str(&format!("{}: {}\n", msg.role, msg.content));
        }

        let completion = self
            .model
            .complete(&CompletionRequest {
                system: SUMMARY_SYSTEM_PROMPT.to_string(),
                messages: vec![PromptMessage::user(prompt)],
                max_tokens: self.max_tokens,
            })
            .await
            .map_err(|e| MemoryError::Summarizer(e.to_string()))?;

        Ok(completion.text)
    }
}
