//! Context Manager: bounded per-user history with summary compaction.

mod manager;
mod summarizer;
mod types;

pub use manager::{CompactionOutcome, ContextManager};
pub use summarizer::ModelSummarizer;
pub use types::{
    estimate_tokens, CompactedSummary, ContextStats, HistoryRecord, PromptEntry, PromptMaterial,
    Role, Turn, SUMMARY_PREFIX,
};
