//! Model invocation helpers.

mod resilient;

pub use resilient::{ResilienceConfig, ResilientInvoker};

/// Result of one attempt to start a model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The candidate started streaming; no further attempts are made.
    Streaming { model: String, attempt: u32 },
    /// The candidate returned an error before streaming.
    Failed {
        model: String,
        attempt: u32,
        error: String,
    },
    /// The candidate did not start streaming before the deadline.
    TimedOut { model: String, attempt: u32 },
}

impl InvocationOutcome {
    pub fn model(&self) -> &str {
        match self {
            Self::Streaming { model, .. } | Self::Failed { model, .. } | Self::TimedOut { model, .. } => {
                model
            }
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }
}
