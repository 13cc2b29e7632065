//! Mock collaborators shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use parley_engine::{
    FragmentStream, LongFormPublisher, MarkupKind, ModelError, ModelEvent, ModelInvoker,
    PromptMaterial, PublishError, SessionHandle, SummarizeError, Summarizer, Transport,
    TransportError, Turn,
};

// ============================================================================
// Fragment streams
// ============================================================================

/// One scripted stream item, emitted after `delay`.
pub type Step = (Duration, Result<ModelEvent, ModelError>);

pub fn text(delay_ms: u64, fragment: &str) -> Step {
    (
        Duration::from_millis(delay_ms),
        Ok(ModelEvent::Text(fragment.to_string())),
    )
}

pub fn usage(tokens: u64) -> Step {
    (Duration::ZERO, Ok(ModelEvent::Usage(tokens)))
}

pub fn failure(delay_ms: u64, message: &str) -> Step {
    (
        Duration::from_millis(delay_ms),
        Err(ModelError::Stream(message.to_string())),
    )
}

/// A stream that sleeps before each step.
pub fn timed_stream(steps: Vec<Step>) -> FragmentStream {
    Box::pin(stream::unfold(steps.into_iter(), |mut steps| async move {
        let (delay, item) = steps.next()?;
        tokio::time::sleep(delay).await;
        Some((item, steps))
    }))
}

// ============================================================================
// Model
// ============================================================================

/// Model that replays one script per call and records every prompt.
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Result<Vec<Step>, ModelError>>>,
    pub prompts: Mutex<Vec<PromptMaterial>>,
    pub calls: AtomicUsize,
    /// How long `invoke` takes before the stream starts.
    pub startup: Mutex<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            startup: Mutex::new(Duration::ZERO),
        })
    }

    pub fn push(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(Ok(steps));
    }

    pub fn push_error(&self, error: ModelError) {
        self.scripts.lock().unwrap().push_back(Err(error));
    }

    pub fn last_prompt(&self) -> PromptMaterial {
        self.prompts.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    fn name(&self) -> &str {
        "scripted-model"
    }

    async fn invoke(&self, prompt: &PromptMaterial) -> Result<FragmentStream, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
        let startup = *self.startup.lock().unwrap();
        tokio::time::sleep(startup).await;
        script.map(timed_stream)
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Begin,
    Update,
    Followup,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub text: String,
    pub markup: MarkupKind,
    pub accepted: bool,
}

/// Transport that records every call.
///
/// Structured texts containing `<bad>` are rejected as malformed markup.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    pub fail_updates: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Accepted update texts, in order.
    pub fn updates(&self) -> Vec<String> {
        self.accepted(CallKind::Update)
    }

    pub fn followups(&self) -> Vec<String> {
        self.accepted(CallKind::Followup)
    }

    pub fn begins(&self) -> usize {
        self.accepted(CallKind::Begin).len()
    }

    fn accepted(&self, kind: CallKind) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind == kind && c.accepted)
            .map(|c| c.text.clone())
            .collect()
    }

    fn record(&self, kind: CallKind, text: &str, markup: MarkupKind, accepted: bool) {
        self.calls.lock().unwrap().push(Call {
            kind,
            text: text.to_string(),
            markup,
            accepted,
        });
    }

    fn check(&self, text: &str, markup: MarkupKind) -> Result<(), TransportError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("503 service unavailable".into()));
        }
        if markup == MarkupKind::Structured && text.contains("<bad>") {
            return Err(TransportError::MarkupRejected(
                "can't parse entities".into(),
            ));
        }
        Ok(())
    }

    fn handle(&self, target: &str) -> SessionHandle {
        SessionHandle {
            target: target.to_string(),
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1,
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn begin(&self, target: &str, placeholder: &str) -> Result<SessionHandle, TransportError> {
        self.record(CallKind::Begin, placeholder, MarkupKind::Plain, true);
        Ok(self.handle(target))
    }

    async fn update_visible(
        &self,
        _handle: &SessionHandle,
        text: &str,
        markup: MarkupKind,
    ) -> Result<(), TransportError> {
        let result = self.check(text, markup);
        self.record(CallKind::Update, text, markup, result.is_ok());
        result
    }

    async fn send_followup(
        &self,
        handle: &SessionHandle,
        text: &str,
        markup: MarkupKind,
    ) -> Result<SessionHandle, TransportError> {
        let result = self.check(text, markup);
        self.record(CallKind::Followup, text, markup, result.is_ok());
        result.map(|()| self.handle(&handle.target))
    }
}

// ============================================================================
// Publisher and summarizer
// ============================================================================

#[derive(Default)]
pub struct MockPublisher {
    pub published: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl MockPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl LongFormPublisher for MockPublisher {
    async fn publish_long_form(&self, title: &str, text: &str) -> Result<String, PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Failed("telegraph down".into()));
        }
        let mut published = self.published.lock().unwrap();
        published.push((title.to_string(), text.to_string()));
        Ok(format!("https://telegra.ph/answer-{}", published.len()))
    }
}

/// Summarizer that joins the previous summary and turn texts with `|`.
#[derive(Default)]
pub struct JoiningSummarizer {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl JoiningSummarizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Summarizer for JoiningSummarizer {
    async fn summarize(
        &self,
        existing: Option<&str>,
        turns: &[Turn],
    ) -> Result<String, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SummarizeError::Failed("summarizer offline".into()));
        }
        let mut parts: Vec<&str> = existing.into_iter().collect();
        parts.extend(turns.iter().map(|t| t.text.as_str()));
        Ok(parts.join("|"))
    }
}
