//! Streaming Delivery Engine.
//!
//! Consumes a model's fragment stream and republishes the growing text to a
//! [`Transport`] at most once per throttle interval.
//!
//! # Flush policy
//!
//! - The first fragment is flushed immediately.
//! - Later fragments flush only once the throttle interval has passed.
//! - Every non-final flush ends with [`CURSOR`]; the final flush never does.
//! - Each flush tries structured markup first and falls back to plain text.
//! - A final text longer than the length ceiling goes to the long-form
//!   publisher and only a preview plus link is shown. Without a publisher
//!   (or if it fails) the text is split over follow-up messages.
//! - Partial output of a failed stream takes the same path, followed by the
//!   failure notice.

mod overflow;
mod session;

use futures_util::StreamExt;
use parley_common::util::{char_len, char_prefix, split_text};
use parley_common::EngineConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ModelError, TransportError};
use crate::traits::{
    FragmentStream, LongFormPublisher, MarkupKind, ModelEvent, SessionHandle, Transport,
};
use overflow::{preview_with_link, with_notice};
use session::DeliverySession;

/// Progress marker appended to every non-final flush.
pub const CURSOR: &str = "▌";

/// Tuning for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    pub throttle_interval: Duration,
    pub length_ceiling: usize,
    pub preview_chars: usize,
    pub split_chunk_chars: usize,
    /// Maximum silence between two fragments before the stream counts as failed
    pub fragment_timeout: Duration,
    /// Deadline of each transport or publisher call
    pub transport_timeout: Duration,
    /// Appended to partial output when the model fails
    pub failure_notice: String,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for DeliveryOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            throttle_interval: config.throttle_interval(),
            length_ceiling: config.length_ceiling,
            preview_chars: config.preview_chars,
            split_chunk_chars: config.split_chunk_chars,
            fragment_timeout: config.fragment_timeout(),
            transport_timeout: config.transport_timeout(),
            failure_notice: "⚠️ The model stopped responding. The answer above may be incomplete."
                .into(),
        }
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Completed,
    Cancelled,
    UpstreamFailed,
}

/// Outcome of [`DeliveryEngine::deliver`].
#[derive(Debug)]
pub struct DeliveryResult {
    pub status: DeliveryStatus,
    /// Exact concatenation of all fragments received.
    pub text: String,
    /// Successful transport updates, including the final one.
    pub flushes: usize,
    /// Tokens reported by the stream, if it reported any.
    pub usage: Option<u64>,
    /// Set when the full text was published elsewhere.
    pub published_url: Option<String>,
    /// Why the stream failed, for [`DeliveryStatus::UpstreamFailed`].
    pub error: Option<ModelError>,
    /// Set when the terminal state of a completed delivery could not be shown.
    pub transport_error: Option<TransportError>,
}

enum Termination {
    Finished,
    Cancelled,
    Failed(ModelError),
}

/// Throttled, fallback-aware republisher of fragment streams.
pub struct DeliveryEngine {
    options: DeliveryOptions,
    publisher: Option<Arc<dyn LongFormPublisher>>,
}

impl DeliveryEngine {
    pub fn new(options: DeliveryOptions) -> Self {
        Self {
            options,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn LongFormPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    /// Drive `stream` to its end, cancellation or failure, editing `handle`.
    ///
    /// `title` names the long-form page if the text overflows.
    pub async fn deliver(
        &self,
        mut stream: FragmentStream,
        transport: &dyn Transport,
        handle: SessionHandle,
        title: &str,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let mut session = DeliverySession::new(handle);
        let mut usage = None;

        let termination = loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = tokio::time::timeout(self.options.fragment_timeout, stream.next()) => Some(next),
            };

            match next {
                None => break Termination::Cancelled,
                Some(Err(_)) => {
                    break Termination::Failed(ModelError::Timeout(self.options.fragment_timeout))
                }
                Some(Ok(None)) => break Termination::Finished,
                Some(Ok(Some(Err(e)))) => break Termination::Failed(e),
                Some(Ok(Some(Ok(ModelEvent::Usage(tokens))))) => usage = Some(tokens),
                Some(Ok(Some(Ok(ModelEvent::Text(fragment))))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    session.push(&fragment);
                    if session.flush_due(self.options.throttle_interval) {
                        self.flush_progress(&mut session, transport).await;
                    }
                }
            }
        };

        let mut result = DeliveryResult {
            status: DeliveryStatus::Completed,
            text: String::new(),
            flushes: 0,
            usage,
            published_url: None,
            error: None,
            transport_error: None,
        };

        match termination {
            Termination::Finished => {
                if !session.buffer.is_empty() {
                    match self.finish(&mut session, transport, title, None).await {
                        Ok(url) => result.published_url = url,
                        Err(e) => {
                            tracing::error!(error = %e, "Final flush failed");
                            result.transport_error = Some(e);
                        }
                    }
                }
            }
            Termination::Cancelled => {
                result.status = DeliveryStatus::Cancelled;
                tracing::info!(fragments = session.sequence, "Delivery cancelled");
                if !session.buffer.is_empty() {
                    match self.finish(&mut session, transport, title, None).await {
                        Ok(url) => result.published_url = url,
                        Err(e) => tracing::warn!(error = %e, "Best-effort flush after cancel failed"),
                    }
                }
            }
            Termination::Failed(e) => {
                result.status = DeliveryStatus::UpstreamFailed;
                tracing::warn!(
                    error = %e,
                    fragments = session.sequence,
                    "Model stream failed, delivering partial output"
                );
                let notice = self.options.failure_notice.as_str();
                let shown = if session.buffer.is_empty() {
                    self.send_visible(transport, &session.handle, notice)
                        .await
                        .map(|()| {
                            session.mark_flushed(notice.to_string());
                            None
                        })
                } else {
                    self.finish(&mut session, transport, title, Some(notice)).await
                };
                match shown {
                    Ok(url) => result.published_url = url,
                    Err(flush_err) => {
                        tracing::warn!(error = %flush_err, "Could not show partial output")
                    }
                }
                result.error = Some(e);
            }
        }

        result.flushes = session.flushes;
        result.text = session.buffer;
        tracing::debug!(
            status = ?result.status,
            flushes = result.flushes,
            chars = char_len(&result.text),
            "Delivery finished"
        );
        result
    }

    /// Throttled intermediate update with the cursor marker.
    async fn flush_progress(&self, session: &mut DeliverySession, transport: &dyn Transport) {
        let room = self
            .options
            .length_ceiling
            .saturating_sub(char_len(CURSOR));
        let visible = format!("{}{CURSOR}", char_prefix(&session.buffer, room));
        session.last_flush = Some(tokio::time::Instant::now());

        if session.is_unchanged(&visible) {
            return;
        }

        match self.send_visible(transport, &session.handle, &visible).await {
            Ok(()) => session.mark_flushed(visible),
            Err(e) => tracing::warn!(
                error = %e,
                sequence = session.sequence,
                "Progress flush failed, continuing"
            ),
        }
    }

    /// Show the terminal state: full text, preview plus link, or split chunks.
    ///
    /// A `notice` goes after the text when it fits, after the preview when the
    /// text was published, and into its own follow-up when the text was split.
    async fn finish(
        &self,
        session: &mut DeliverySession,
        transport: &dyn Transport,
        title: &str,
        notice: Option<&str>,
    ) -> Result<Option<String>, TransportError> {
        let text = session.buffer.clone();
        let notice_len = notice.map_or(0, |n| char_len(n) + 2);

        if char_len(&text) + notice_len <= self.options.length_ceiling {
            let shown = with_notice(&text, notice);
            self.send_visible(transport, &session.handle, &shown).await?;
            session.mark_flushed(shown);
            return Ok(None);
        }

        if let Some(url) = self.publish(title, &text).await {
            let preview = with_notice(
                &preview_with_link(&text, self.options.preview_chars, &url),
                notice,
            );
            self.send_visible(transport, &session.handle, &preview).await?;
            session.mark_flushed(preview);
            return Ok(Some(url));
        }

        let chunks = split_text(&text, self.options.split_chunk_chars);
        tracing::info!(chunks = chunks.len(), "Splitting long answer over several messages");

        let mut chunks = chunks.into_iter();
        if let Some(first) = chunks.next() {
            self.send_visible(transport, &session.handle, &first).await?;
            session.mark_flushed(first);
        }
        for chunk in chunks.chain(notice.map(str::to_string)) {
            self.send_followup(transport, &session.handle, &chunk).await?;
        }

        Ok(None)
    }

    async fn publish(&self, title: &str, text: &str) -> Option<String> {
        let publisher = self.publisher.as_ref()?;

        match tokio::time::timeout(
            self.options.transport_timeout,
            publisher.publish_long_form(title, text),
        )
        .await
        {
            Ok(Ok(url)) => {
                tracing::info!(url = %url, chars = char_len(text), "Published long answer");
                Some(url)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Long-form publishing failed, splitting instead");
                None
            }
            Err(_) => {
                tracing::warn!("Long-form publishing timed out, splitting instead");
                None
            }
        }
    }

    /// Update the visible text, retrying as plain text if markup is rejected.
    async fn send_visible(
        &self,
        transport: &dyn Transport,
        handle: &SessionHandle,
        text: &str,
    ) -> Result<(), TransportError> {
        match self
            .call(transport.update_visible(handle, text, MarkupKind::Structured))
            .await
        {
            Err(TransportError::MarkupRejected(reason)) => {
                tracing::debug!(reason = %reason, "Markup rejected, retrying as plain text");
                self.call(transport.update_visible(handle, text, MarkupKind::Plain))
                    .await
            }
            other => other,
        }
    }

    async fn send_followup(
        &self,
        transport: &dyn Transport,
        handle: &SessionHandle,
        text: &str,
    ) -> Result<SessionHandle, TransportError> {
        match self
            .call(transport.send_followup(handle, text, MarkupKind::Structured))
            .await
        {
            Err(TransportError::MarkupRejected(reason)) => {
                tracing::debug!(reason = %reason, "Markup rejected, retrying as plain text");
                self.call(transport.send_followup(handle, text, MarkupKind::Plain))
                    .await
            }
            other => other,
        }
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        tokio::time::timeout(self.options.transport_timeout, fut)
            .await
            .unwrap_or(Err(TransportError::Timeout))
    }
}
