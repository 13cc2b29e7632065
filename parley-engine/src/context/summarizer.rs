//! Summarization through the chat model itself.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::fmt::Write;
use std::sync::Arc;

use super::types::{PromptMaterial, Role, Turn};
use crate::error::SummarizeError;
use crate::traits::{ModelEvent, ModelInvoker, Summarizer};

const INSTRUCTION: &str = "Condense the conversation below into a short summary that a \
    later reply can rely on. Keep the user's goals, preferences, facts they shared and any \
    decisions reached. Drop greetings and small talk. Write in the third person, in the \
    language of the conversation, in at most 200 words. Output only the summary.";

/// A [`Summarizer`] backed by any [`ModelInvoker`].
pub struct ModelSummarizer {
    model: Arc<dyn ModelInvoker>,
}

impl ModelSummarizer {
    pub fn new(model: Arc<dyn ModelInvoker>) -> Self {
        Self { model }
    }

    /// Role-labelled transcript of the previous summary and the evicted turns.
    fn format_transcript(existing_summary: Option<&str>, turns: &[Turn]) -> String {
        let mut transcript = String::new();

        if let Some(summary) = existing_summary {
            let _ = write!(transcript, "Earlier summary: {summary}\n\n");
        }
        for turn in turns {
            let label = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "Context",
            };
            let _ = write!(transcript, "{label}: {}\n\n", turn.text);
        }

        transcript.trim_end().to_string()
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(
        &self,
        existing_summary: Option<&str>,
        turns: &[Turn],
    ) -> Result<String, SummarizeError> {
        let mut prompt = PromptMaterial::default();
        prompt.push(Role::System, INSTRUCTION);
        prompt.push(Role::User, Self::format_transcript(existing_summary, turns));

        let mut stream = self
            .model
            .invoke(&prompt)
            .await
            .map_err(|e| SummarizeError::Failed(e.to_string()))?;

        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event.map_err(|e| SummarizeError::Failed(e.to_string()))? {
                ModelEvent::Text(fragment) => summary.push_str(&fragment),
                ModelEvent::Usage(_) => {}
            }
        }

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(SummarizeError::Empty);
        }
        Ok(summary.to_string())
    }
}
