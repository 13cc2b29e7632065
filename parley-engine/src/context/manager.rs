//! Append, compaction and prompt assembly.

use std::sync::Arc;
use std::time::Duration;

use super::types::{
    estimate_tokens, CompactedSummary, ContextStats, HistoryRecord, PromptMaterial, Role, Turn,
    SUMMARY_PREFIX,
};
use crate::error::SummarizeError;
use crate::traits::Summarizer;

/// What an append did to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// The window was not exceeded and nothing was waiting.
    NotNeeded,
    /// `turns` old turns were folded into the summary.
    Compacted { turns: usize },
    /// Summarization failed; `pending` raw turns are kept for the next attempt.
    Deferred { pending: usize },
}

/// Keeps a history within `window` full turns.
pub struct ContextManager {
    summarizer: Arc<dyn Summarizer>,
    window: usize,
    summarize_timeout: Duration,
}

impl ContextManager {
    pub fn new(summarizer: Arc<dyn Summarizer>, window: usize) -> Self {
        Self {
            summarizer,
            window: window.max(1),
            summarize_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_summarize_timeout(mut self, timeout: Duration) -> Self {
        self.summarize_timeout = timeout;
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Summary first, then turns still waiting to be summarized, then the
    /// retained window.
    pub fn build_prompt(history: &HistoryRecord) -> PromptMaterial {
        let mut prompt = PromptMaterial::default();

        if let Some(summary) = &history.summary {
            prompt.push(Role::System, format!("{SUMMARY_PREFIX}\n{}", summary.text));
        }
        for turn in history.pending.iter().chain(history.turns.iter()) {
            prompt.push(turn.role, turn.text.clone());
        }

        prompt
    }

    /// Add a turn and compact if the window is exceeded.
    pub async fn append(&self, history: &mut HistoryRecord, turn: Turn) -> CompactionOutcome {
        history.turns.push(turn);
        self.compact(history).await
    }

    /// Add both sides of a finished exchange, compacting at most once.
    pub async fn append_exchange(
        &self,
        history: &mut HistoryRecord,
        user: Turn,
        assistant: Turn,
    ) -> CompactionOutcome {
        history.turns.push(user);
        history.turns.push(assistant);
        self.compact(history).await
    }

    /// Move the oldest `count - window` turns out of the window and fold
    /// them, with anything still pending, into the summary.
    ///
    /// With no overflow and nothing pending this is a no-op.
    pub async fn compact(&self, history: &mut HistoryRecord) -> CompactionOutcome {
        let overflow = history.turns.len().saturating_sub(self.window);
        if overflow == 0 && history.pending.is_empty() {
            return CompactionOutcome::NotNeeded;
        }

        history.pending.extend(history.turns.drain(..overflow));

        let result = {
            let existing = history.summary.as_ref().map(|s| s.text.as_str());
            match tokio::time::timeout(
                self.summarize_timeout,
                self.summarizer.summarize(existing, &history.pending),
            )
            .await
            {
                Ok(Ok(text)) if text.trim().is_empty() => Err(SummarizeError::Empty),
                Ok(result) => result,
                Err(_) => Err(SummarizeError::Timeout),
            }
        };

        match result {
            Ok(text) => {
                let turns = history.pending.len();
                Self::fold_into_summary(history, text.trim().to_string());
                tracing::info!(
                    evicted = turns,
                    retained = history.turns.len(),
                    "Compacted conversation history"
                );
                CompactionOutcome::Compacted { turns }
            }
            Err(e) => {
                let pending = history.pending.len();
                tracing::warn!(
                    error = %e,
                    pending,
                    "Summarization failed, keeping evicted turns for the next attempt"
                );
                CompactionOutcome::Deferred { pending }
            }
        }
    }

    fn fold_into_summary(history: &mut HistoryRecord, text: String) {
        let evicted = std::mem::take(&mut history.pending);
        let (Some(first), Some(last)) = (evicted.first(), evicted.last()) else {
            return;
        };

        let tokens: usize = evicted.iter().map(|t| estimate_tokens(&t.text)).sum();
        let previous = history.summary.take();

        history.summary = Some(CompactedSummary {
            text,
            covers_from: previous
                .as_ref()
                .map_or(first.timestamp, |s| s.covers_from),
            covers_to: last.timestamp,
            turns_compacted: previous.as_ref().map_or(0, |s| s.turns_compacted) + evicted.len(),
            tokens_saved: previous.as_ref().map_or(0, |s| s.tokens_saved) + tokens,
        });
    }

    /// Drop every turn and the summary. Returns how many turns were removed.
    pub fn clear(history: &mut HistoryRecord) -> usize {
        let removed = history.turns.len() + history.pending.len();
        *history = HistoryRecord::default();
        removed
    }

    pub fn stats(&self, history: &HistoryRecord) -> ContextStats {
        ContextStats {
            retained_turns: history.turns.len(),
            pending_turns: history.pending.len(),
            window: self.window,
            turns_compacted: history.summary.as_ref().map_or(0, |s| s.turns_compacted),
            tokens_saved: history.summary.as_ref().map_or(0, |s| s.tokens_saved),
            has_summary: history.summary.is_some(),
        }
    }
}
