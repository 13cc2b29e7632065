//! Session Sequencer: composes quota, context and delivery per user turn.
//!
//! At most one turn per user is in flight; a second concurrent turn from the
//! same user is rejected with [`EngineError::TurnInProgress`]. Nothing here
//! holds a cross-user lock across an await point.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::stream;
use parley_common::logging::generate_trace_id;
use parley_common::{EngineConfig, Error};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::context::{
    CompactionOutcome, ContextManager, ContextStats, ModelSummarizer, PromptMaterial, Turn,
};
use crate::delivery::{DeliveryEngine, DeliveryOptions, DeliveryStatus};
use crate::error::{EngineError, ModelError, TransportError};
use crate::quota::{
    Decision, PlanTable, PlanTier, QuotaEnforcer, RequestKind, UsageKind, UsageReport,
};
use crate::store::SessionStore;
use crate::traits::{
    FragmentStream, LongFormPublisher, MarkupKind, ModelInvoker, Summarizer, Transport,
};

/// What a finished turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub status: DeliveryStatus,
    /// The full assistant answer as streamed.
    pub text: String,
    pub flushes: usize,
    /// Tokens charged to the user for this turn.
    pub tokens_recorded: u64,
    pub published_url: Option<String>,
    /// `None` when the exchange was not added to history.
    pub compaction: Option<CompactionOutcome>,
}

/// Outcome of [`SessionSequencer::handle_turn`].
pub type TurnResult = Result<TurnReport, EngineError>;

/// Releases a user's in-flight slot when dropped.
struct InFlightGuard<'a> {
    slots: &'a DashMap<String, CancellationToken>,
    user_id: String,
    token: CancellationToken,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slots.remove(&self.user_id);
    }
}

/// User-facing texts the sequencer writes itself.
#[derive(Debug, Clone)]
struct Notices {
    placeholder: String,
    empty_response: String,
    cancelled: String,
}

impl Default for Notices {
    fn default() -> Self {
        Self {
            placeholder: "💭 Thinking…".into(),
            empty_response: "The model returned an empty response. Please try again.".into(),
            cancelled: "⏹ Generation stopped.".into(),
        }
    }
}

/// Builder for [`SessionSequencer`].
pub struct SequencerBuilder<S> {
    store: S,
    model: Arc<dyn ModelInvoker>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    plans: PlanTable,
    summarizer: Option<Arc<dyn Summarizer>>,
    publisher: Option<Arc<dyn LongFormPublisher>>,
    clock: Arc<dyn Clock>,
    notices: Notices,
}

impl<S: SessionStore> SequencerBuilder<S> {
    pub fn new(store: S, model: Arc<dyn ModelInvoker>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            model,
            transport,
            config: EngineConfig::default(),
            plans: PlanTable::default(),
            summarizer: None,
            publisher: None,
            clock: Arc::new(SystemClock),
            notices: Notices::default(),
        }
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn plans(mut self, plans: PlanTable) -> Self {
        self.plans = plans;
        self
    }

    /// Defaults to a [`ModelSummarizer`] over the chat model.
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn LongFormPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn placeholder(mut self, text: impl Into<String>) -> Self {
        self.notices.placeholder = text.into();
        self
    }

    pub fn build(self) -> SessionSequencer<S> {
        let summarizer = self
            .summarizer
            .unwrap_or_else(|| Arc::new(ModelSummarizer::new(Arc::clone(&self.model))));
        let context = ContextManager::new(summarizer, self.config.context_window)
            .with_summarize_timeout(self.config.summarize_timeout());

        let mut delivery = DeliveryEngine::new(DeliveryOptions::from(&self.config));
        if let Some(publisher) = self.publisher {
            delivery = delivery.with_publisher(publisher);
        }

        SessionSequencer {
            store: self.store,
            model: self.model,
            transport: self.transport,
            quota: Arc::new(QuotaEnforcer::new(self.plans)),
            context,
            delivery,
            clock: self.clock,
            in_flight: DashMap::new(),
            notices: self.notices,
            model_timeout: self.config.model_timeout(),
            storage_timeout: self.config.storage_timeout(),
            transport_timeout: self.config.transport_timeout(),
        }
    }
}

/// Per-user turn orchestration over shared collaborators.
pub struct SessionSequencer<S> {
    store: S,
    model: Arc<dyn ModelInvoker>,
    transport: Arc<dyn Transport>,
    quota: Arc<QuotaEnforcer>,
    context: ContextManager,
    delivery: DeliveryEngine,
    clock: Arc<dyn Clock>,
    in_flight: DashMap<String, CancellationToken>,
    notices: Notices,
    model_timeout: Duration,
    storage_timeout: Duration,
    transport_timeout: Duration,
}

impl<S: SessionStore> SessionSequencer<S> {
    pub fn builder(
        store: S,
        model: Arc<dyn ModelInvoker>,
        transport: Arc<dyn Transport>,
    ) -> SequencerBuilder<S> {
        SequencerBuilder::new(store, model, transport)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one conversation turn for `user_id`.
    ///
    /// Quota check, prompt assembly, streamed delivery, usage recording and
    /// history append, in that order.
    pub async fn handle_turn(&self, user_id: &str, message: &str) -> TurnResult {
        let trace_id = generate_trace_id();
        let span = parley_common::turn_span!(user_id, trace_id);
        self.run_turn(user_id, message).instrument(span).await
    }

    async fn run_turn(&self, user_id: &str, message: &str) -> TurnResult {
        let guard = self.admit(user_id)?;
        let today = self.clock.today();
        let quota = Arc::clone(&self.quota);

        let decision = self
            .persist(
                "checking quota",
                self.store.update_usage(user_id, quota.new_record(today), move |usage| {
                    quota.check_allowed(usage, RequestKind::Chat, today)
                }),
            )
            .await?;
        if let Decision::Deny(reason) = decision {
            tracing::info!(reason = %reason, "Turn denied by quota");
            return Err(EngineError::QuotaDenied(reason));
        }

        let mut history = self
            .persist("loading history", self.store.load_history(user_id))
            .await?;
        let prompt = ContextManager::build_prompt(&history).with_user_message(message);

        let handle = self
            .call_transport(self.transport.begin(user_id, &self.notices.placeholder))
            .await?;

        let stream = self.start_stream(&prompt, &guard.token).await;
        let title = format!("{} | {}", self.model.name(), today.format("%d.%m.%Y"));
        let result = self
            .delivery
            .deliver(
                stream,
                self.transport.as_ref(),
                handle.clone(),
                &title,
                &guard.token,
            )
            .await;

        // Measured consumption is charged whatever the outcome.
        let tokens = result.usage.unwrap_or(0);
        if tokens > 0 {
            let day = self.clock.today();
            let quota = Arc::clone(&self.quota);
            self.persist(
                "recording usage",
                self.store.update_usage(user_id, quota.new_record(day), move |usage| {
                    quota.apply_lazy_reset(usage, day);
                    QuotaEnforcer::record(usage, UsageKind::Tokens, tokens);
                }),
            )
            .await?;
        }

        if let Some(e) = result.transport_error {
            return Err(EngineError::Transport(e));
        }

        if result.status == DeliveryStatus::UpstreamFailed {
            let source = result
                .error
                .unwrap_or_else(|| ModelError::Stream("stream ended with an error".into()));
            return Err(EngineError::UpstreamModel {
                source,
                partial: result.text,
            });
        }

        let mut report = TurnReport {
            status: result.status,
            text: result.text,
            flushes: result.flushes,
            tokens_recorded: tokens,
            published_url: result.published_url,
            compaction: None,
        };

        if report.text.is_empty() {
            let notice = match report.status {
                DeliveryStatus::Cancelled => &self.notices.cancelled,
                _ => &self.notices.empty_response,
            };
            if let Err(e) = self
                .call_transport(self.transport.update_visible(&handle, notice, MarkupKind::Plain))
                .await
            {
                tracing::warn!(error = %e, "Could not show empty-response notice");
            }
            return Ok(report);
        }

        let now = self.clock.now();
        let compaction = self
            .context
            .append_exchange(
                &mut history,
                Turn::user(message, now),
                Turn::assistant(report.text.clone(), self.model.name(), now),
            )
            .await;
        self.persist("saving history", self.store.save_history(user_id, &history))
            .await?;

        report.compaction = Some(compaction);
        tracing::info!(
            status = ?report.status,
            flushes = report.flushes,
            tokens,
            "Turn finished"
        );
        Ok(report)
    }

    /// Cancel the user's in-flight turn. Returns whether there was one.
    pub fn cancel_turn(&self, user_id: &str) -> bool {
        match self.in_flight.get(user_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(user_id, "Turn cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Whether the user has a turn in flight.
    pub fn is_busy(&self, user_id: &str) -> bool {
        self.in_flight.contains_key(user_id)
    }

    /// Delete the user's history and summary. Returns how many turns were removed.
    pub async fn clear_history(&self, user_id: &str) -> Result<usize, EngineError> {
        let _guard = self.admit(user_id)?;
        let mut history = self
            .persist("loading history", self.store.load_history(user_id))
            .await?;
        let removed = ContextManager::clear(&mut history);
        self.persist("saving history", self.store.save_history(user_id, &history))
            .await?;
        tracing::info!(user_id, removed, "History cleared");
        Ok(removed)
    }

    pub async fn context_stats(&self, user_id: &str) -> Result<ContextStats, EngineError> {
        let history = self
            .persist("loading history", self.store.load_history(user_id))
            .await?;
        Ok(self.context.stats(&history))
    }

    pub async fn usage_report(&self, user_id: &str) -> Result<UsageReport, EngineError> {
        let today = self.clock.today();
        let quota = Arc::clone(&self.quota);
        self.persist(
            "reading usage",
            self.store.update_usage(user_id, quota.new_record(today), move |usage| {
                quota.report(usage, today)
            }),
        )
        .await
    }

    /// Move the user to `tier`; today's counters are kept.
    pub async fn set_plan(&self, user_id: &str, tier: PlanTier) -> Result<UsageReport, EngineError> {
        let today = self.clock.today();
        let quota = Arc::clone(&self.quota);
        let report = self
            .persist(
                "changing plan",
                self.store.update_usage(user_id, quota.new_record(today), move |usage| {
                    quota.apply_lazy_reset(usage, today);
                    quota.set_plan(usage, tier);
                    quota.report(usage, today)
                }),
            )
            .await?;
        tracing::info!(user_id, tier = %tier, "Plan changed");
        Ok(report)
    }

    /// Admission check for actions run outside [`Self::handle_turn`].
    pub async fn authorize(&self, user_id: &str, kind: RequestKind) -> Result<(), EngineError> {
        let today = self.clock.today();
        let quota = Arc::clone(&self.quota);
        let decision = self
            .persist(
                "checking quota",
                self.store.update_usage(user_id, quota.new_record(today), move |usage| {
                    quota.check_allowed(usage, kind, today)
                }),
            )
            .await?;
        match decision {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                tracing::info!(user_id, reason = %reason, "Request denied by quota");
                Err(EngineError::QuotaDenied(reason))
            }
        }
    }

    /// Charge a completed action's measured consumption.
    pub async fn record_usage(
        &self,
        user_id: &str,
        kind: RequestKind,
        amount: u64,
    ) -> Result<(), EngineError> {
        let Some(counter) = kind.usage_kind() else {
            return Ok(());
        };
        let today = self.clock.today();
        let quota = Arc::clone(&self.quota);
        self.persist(
            "recording usage",
            self.store.update_usage(user_id, quota.new_record(today), move |usage| {
                quota.apply_lazy_reset(usage, today);
                QuotaEnforcer::record(usage, counter, amount);
            }),
        )
        .await
    }

    fn admit(&self, user_id: &str) -> Result<InFlightGuard<'_>, EngineError> {
        match self.in_flight.entry(user_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(user_id, "Rejecting concurrent turn");
                Err(EngineError::TurnInProgress(user_id.to_string()))
            }
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(InFlightGuard {
                    slots: &self.in_flight,
                    user_id: user_id.to_string(),
                    token,
                })
            }
        }
    }

    /// Start the model call; failures become a one-item error stream so
    /// delivery reports them like any other upstream error. Cancelling while
    /// the call is pending yields an empty stream.
    async fn start_stream(
        &self,
        prompt: &PromptMaterial,
        cancel: &CancellationToken,
    ) -> FragmentStream {
        let invoke = tokio::time::timeout(self.model_timeout, self.model.invoke(prompt));
        let error = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("Turn cancelled before the model started streaming");
                return Box::pin(stream::empty());
            }
            outcome = invoke => match outcome {
                Ok(Ok(stream)) => return stream,
                Ok(Err(e)) => e,
                Err(_) => ModelError::Timeout(self.model_timeout),
            },
        };
        Box::pin(stream::iter(vec![Err(error)]))
    }

    async fn persist<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = parley_common::Result<T>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.storage_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(error = %e, operation, "Persistence failed");
                Err(EngineError::Persistence(e.with_context(operation)))
            }
            Err(_) => {
                tracing::error!(operation, "Persistence timed out");
                Err(EngineError::Persistence(Error::Timeout(operation.to_string())))
            }
        }
    }

    async fn call_transport<T>(
        &self,
        fut: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        tokio::time::timeout(self.transport_timeout, fut)
            .await
            .unwrap_or(Err(TransportError::Timeout))
    }
}
