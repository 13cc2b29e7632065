//! Error taxonomy of the session engine.
//!
//! Only [`EngineError`] ever leaves [`crate::SessionSequencer::handle_turn`].
//! Markup rejections and summarization failures are recovered inside the
//! delivery engine and context manager respectively.

use std::time::Duration;
use thiserror::Error;

use crate::model::InvocationOutcome;
use crate::quota::DenyReason;

/// Failure of a model call or its fragment stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{model} request failed: {message}")]
    Request { model: String, message: String },

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("all {} model attempts failed", .0.len())]
    Exhausted(Vec<InvocationOutcome>),
}

impl ModelError {
    /// Convenience constructor for a failed request.
    pub fn request(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            model: model.into(),
            message: message.into(),
        }
    }
}

/// Failure of a transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The structured markup could not be rendered by the channel.
    #[error("markup rejected: {0}")]
    MarkupRejected(String),

    #[error("transport call timed out")]
    Timeout,

    #[error("transport call failed: {0}")]
    Failed(String),
}

/// Failure of a summarization call.
#[derive(Debug, Clone, Error)]
pub enum SummarizeError {
    #[error("summarization failed: {0}")]
    Failed(String),

    #[error("summarizer returned an empty summary")]
    Empty,

    #[error("summarization timed out")]
    Timeout,
}

/// Failure of a long-form publish.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("publishing failed: {0}")]
    Failed(String),

    #[error("publishing timed out")]
    Timeout,
}

/// Turn-fatal errors surfaced to the handler layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The plan does not allow this request right now.
    #[error("{0}")]
    QuotaDenied(DenyReason),

    /// The model failed. Any partial output has already been delivered.
    #[error("upstream model error: {source}")]
    UpstreamModel { source: ModelError, partial: String },

    /// A persistence read or write failed; nothing from this step is committed.
    #[error("persistence error: {0}")]
    Persistence(#[from] parley_common::Error),

    /// The user already has a turn in flight.
    #[error("a turn is already in progress for user {0}")]
    TurnInProgress(String),

    /// The transport failed on a call that could not be skipped.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl EngineError {
    /// Short message suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::QuotaDenied(reason) => reason.to_string(),
            Self::UpstreamModel { .. } => "The model failed to finish its answer.".into(),
            Self::TurnInProgress(_) => {
                "Please wait, the previous answer is still being generated.".into()
            }
            Self::Persistence(_) | Self::Transport(_) => {
                "Something went wrong, please try again.".into()
            }
        }
    }
}
