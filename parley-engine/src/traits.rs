//! Collaborator contracts consumed by the engine.
//!
//! The engine never talks to a model vendor, a chat network or a publishing
//! service directly. Adapters implement these traits.

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::context::{PromptMaterial, Turn};
use crate::error::{ModelError, PublishError, SummarizeError, TransportError};

/// One item of a model's output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// An incremental text fragment.
    Text(String),
    /// Tokens consumed by the call, reported once near the end of the stream.
    Usage(u64),
}

/// Ordered fragment stream of one model call.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, ModelError>> + Send>>;

/// A streaming model endpoint.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Model tag recorded on assistant turns.
    fn name(&self) -> &str;

    /// Start a call. Returning `Ok` means the model has started streaming.
    async fn invoke(&self, prompt: &PromptMaterial) -> Result<FragmentStream, ModelError>;
}

/// Folds evicted turns into the running summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        existing_summary: Option<&str>,
        turns: &[Turn],
    ) -> Result<String, SummarizeError>;
}

/// How the transport should render a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkupKind {
    /// Render Markdown-style markup into the channel's rich format.
    Structured,
    /// Send the text verbatim.
    Plain,
}

/// A message on the remote side that the engine edits in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Conversation the message lives in.
    pub target: String,
    /// Channel-assigned message id.
    pub message_id: i64,
}

/// The rate-limited output channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post a placeholder message for a new turn and return its handle.
    async fn begin(&self, target: &str, placeholder: &str) -> Result<SessionHandle, TransportError>;

    /// Replace the visible content of the handle's message.
    async fn update_visible(
        &self,
        handle: &SessionHandle,
        text: &str,
        markup: MarkupKind,
    ) -> Result<(), TransportError>;

    /// Post an additional message after the handle's message.
    async fn send_followup(
        &self,
        handle: &SessionHandle,
        text: &str,
        markup: MarkupKind,
    ) -> Result<SessionHandle, TransportError>;
}

/// Secondary publisher for texts too long for the transport.
#[async_trait]
pub trait LongFormPublisher: Send + Sync {
    /// Publish `text` and return a reference URL.
    async fn publish_long_form(&self, title: &str, text: &str) -> Result<String, PublishError>;
}
