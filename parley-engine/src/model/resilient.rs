//! Ordered fallback across model candidates, with retry and backoff.
//!
//! Each candidate is retried with exponential backoff before moving on to
//! the next one. The first candidate that starts streaming wins; if none
//! does, the caller gets [`ModelError::Exhausted`] with every attempt.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::InvocationOutcome;
use crate::context::PromptMaterial;
use crate::error::ModelError;
use crate::traits::{FragmentStream, ModelInvoker};

/// Configuration for resilient invocation behavior.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum number of retries per candidate before falling back.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles with each retry).
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Deadline for one attempt to start streaming.
    pub attempt_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 100,
            max_backoff_ms: 10_000,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

/// A [`ModelInvoker`] that tries several candidates in order.
pub struct ResilientInvoker {
    candidates: Vec<Arc<dyn ModelInvoker>>,
    config: ResilienceConfig,
}

impl ResilientInvoker {
    /// The first candidate is the primary, subsequent candidates are fallbacks.
    pub fn new(candidates: Vec<Arc<dyn ModelInvoker>>, config: ResilienceConfig) -> Self {
        Self { candidates, config }
    }

    pub fn with_defaults(candidates: Vec<Arc<dyn ModelInvoker>>) -> Self {
        Self::new(candidates, ResilienceConfig::default())
    }

    /// Calculate backoff delay for a given attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }

    /// Try every candidate until one streams, returning the attempt log too.
    pub async fn invoke_with_outcomes(
        &self,
        prompt: &PromptMaterial,
    ) -> (Result<FragmentStream, ModelError>, Vec<InvocationOutcome>) {
        let mut outcomes = Vec::new();

        for (idx, candidate) in self.candidates.iter().enumerate() {
            let model = candidate.name().to_string();

            for attempt in 0..=self.config.max_retries {
                let number = attempt + 1;
                match tokio::time::timeout(self.config.attempt_timeout, candidate.invoke(prompt))
                    .await
                {
                    Ok(Ok(stream)) => {
                        if number > 1 || idx > 0 {
                            tracing::info!(model = %model, attempt = number, "Model recovered after retries");
                        }
                        outcomes.push(InvocationOutcome::Streaming {
                            model,
                            attempt: number,
                        });
                        return (Ok(stream), outcomes);
                    }
                    Ok(Err(e)) => outcomes.push(InvocationOutcome::Failed {
                        model: model.clone(),
                        attempt: number,
                        error: e.to_string(),
                    }),
                    Err(_) => outcomes.push(InvocationOutcome::TimedOut {
                        model: model.clone(),
                        attempt: number,
                    }),
                }

                // Only sleep if there are more retries to attempt
                if attempt < self.config.max_retries {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        model = %model,
                        attempt = number,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            if let Some(next) = self.candidates.get(idx + 1) {
                tracing::warn!(
                    failed_model = %model,
                    next_model = next.name(),
                    "Switching to fallback model"
                );
            }
        }

        tracing::error!(attempts = outcomes.len(), "All model candidates failed");
        (Err(ModelError::Exhausted(outcomes.clone())), outcomes)
    }
}

#[async_trait]
impl ModelInvoker for ResilientInvoker {
    fn name(&self) -> &str {
        self.candidates
            .first()
            .map_or("resilient", |primary| primary.name())
    }

    async fn invoke(&self, prompt: &PromptMaterial) -> Result<FragmentStream, ModelError> {
        self.invoke_with_outcomes(prompt).await.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ModelEvent;
    use futures_util::{stream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock model for testing
    struct MockModel {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail_until: usize,
        stall: bool,
    }

    impl MockModel {
        fn new(name: &'static str, fail_until: usize) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    calls: Arc::clone(&calls),
                    fail_until,
                    stall: false,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl ModelInvoker for MockModel {
        fn name(&self) -> &str {
            self.name
        }

        async fn invoke(&self, _prompt: &PromptMaterial) -> Result<FragmentStream, ModelError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if call < self.fail_until {
                return Err(ModelError::request(self.name, "429 rate limited"));
            }
            Ok(Box::pin(stream::iter(vec![Ok(ModelEvent::Text(
                self.name.to_string(),
            ))])))
        }
    }

    fn fast_config() -> ResilienceConfig {
        ResilienceConfig {
            max_retries: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 5,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    async fn first_text(stream: FragmentStream) -> String {
        match stream.into_future().await.0 {
            Some(Ok(ModelEvent::Text(t))) => t,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_primary_succeeds() {
        let (primary, calls) = MockModel::new("primary", 0);
        let invoker = ResilientInvoker::new(vec![Arc::new(primary)], fast_config());

        let (result, outcomes) = invoker.invoke_with_outcomes(&PromptMaterial::default()).await;
        assert_eq!(first_text(result.unwrap()).await, "primary");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcomes,
            vec![InvocationOutcome::Streaming {
                model: "primary".into(),
                attempt: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (primary, calls) = MockModel::new("primary", 1);
        let invoker = ResilientInvoker::new(vec![Arc::new(primary)], fast_config());

        let (result, outcomes) = invoker.invoke_with_outcomes(&PromptMaterial::default()).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_streaming());
        assert!(outcomes[1].is_streaming());
    }

    #[tokio::test]
    async fn test_fallback_to_secondary() {
        let (primary, primary_calls) = MockModel::new("primary", usize::MAX);
        let (secondary, secondary_calls) = MockModel::new("secondary", 0);
        let invoker = ResilientInvoker::new(
            vec![Arc::new(primary), Arc::new(secondary)],
            fast_config(),
        );

        let stream = invoker.invoke(&PromptMaterial::default()).await.unwrap();
        assert_eq!(first_text(stream).await, "secondary");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(invoker.name(), "primary");
    }

    #[tokio::test]
    async fn test_all_fail_is_exhausted() {
        let (a, _) = MockModel::new("a", usize::MAX);
        let (b, _) = MockModel::new("b", usize::MAX);
        let invoker = ResilientInvoker::new(vec![Arc::new(a), Arc::new(b)], fast_config());

        match invoker.invoke(&PromptMaterial::default()).await {
            Err(ModelError::Exhausted(outcomes)) => {
                assert_eq!(outcomes.len(), 4);
                assert_eq!(outcomes[0].model(), "a");
                assert_eq!(outcomes[3].model(), "b");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected exhaustion"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_candidate_times_out() {
        let (mut stalled, _) = MockModel::new("stalled", 0);
        stalled.stall = true;
        let (backup, _) = MockModel::new("backup", 0);
        let config = ResilienceConfig {
            max_retries: 0,
            ..fast_config()
        };
        let invoker = ResilientInvoker::new(vec![Arc::new(stalled), Arc::new(backup)], config);

        let (result, outcomes) = invoker.invoke_with_outcomes(&PromptMaterial::default()).await;
        assert!(result.is_ok());
        assert_eq!(
            outcomes[0],
            InvocationOutcome::TimedOut {
                model: "stalled".into(),
                attempt: 1
            }
        );
        assert_eq!(outcomes[1].model(), "backup");
    }

    #[test]
    fn test_backoff_delay() {
        let invoker = ResilientInvoker::new(
            vec![],
            ResilienceConfig {
                max_retries: 5,
                base_backoff_ms: 100,
                max_backoff_ms: 1_000,
                attempt_timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(invoker.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(invoker.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(invoker.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(invoker.backoff_delay(4), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_empty_candidate_list() {
        let invoker = ResilientInvoker::with_defaults(vec![]);
        assert_eq!(invoker.name(), "resilient");
        assert!(matches!(
            invoker.invoke(&PromptMaterial::default()).await,
            Err(ModelError::Exhausted(outcomes)) if outcomes.is_empty()
        ));
    }
}
