//! Lazy reset, admission check and recording over a usage record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::plan::{Capability, Limit, PlanTable, PlanTier};

/// A metered counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Tokens,
    Assets,
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tokens => f.write_str("token"),
            Self::Assets => f.write_str("generation"),
        }
    }
}

/// What the user is asking to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// A token-budgeted model call.
    Chat,
    /// An asset-generation call.
    ImageGeneration,
    /// A capability-gated action with no metered counter.
    VideoDownload,
}

impl RequestKind {
    pub fn capability(self) -> Capability {
        match self {
            Self::Chat => Capability::Chat,
            Self::ImageGeneration => Capability::ImageGeneration,
            Self::VideoDownload => Capability::VideoDownload,
        }
    }

    /// The counter this kind of request is charged against, if any.
    pub fn usage_kind(self) -> Option<UsageKind> {
        match self {
            Self::Chat => Some(UsageKind::Tokens),
            Self::ImageGeneration => Some(UsageKind::Assets),
            Self::VideoDownload => None,
        }
    }
}

/// Per-user consumption in the current daily period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tier: PlanTier,
    pub tokens_used: u64,
    pub tokens_limit: Limit,
    pub assets_used: u64,
    pub assets_limit: Limit,
    pub reset_date: NaiveDate,
}

impl UsageRecord {
    pub fn used(&self, kind: UsageKind) -> u64 {
        match kind {
            UsageKind::Tokens => self.tokens_used,
            UsageKind::Assets => self.assets_used,
        }
    }

    pub fn limit(&self, kind: UsageKind) -> Limit {
        match kind {
            UsageKind::Tokens => self.tokens_limit,
            UsageKind::Assets => self.assets_limit,
        }
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The daily allowance for this counter is used up.
    LimitReached {
        tier: PlanTier,
        kind: UsageKind,
        limit: u64,
    },
    /// The plan does not include the capability at all.
    CapabilityUnavailable {
        tier: PlanTier,
        capability: Capability,
    },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitReached { tier, kind, limit } => write!(
                f,
                "Daily {kind} limit reached: the {tier} plan allows {limit} per day. \
                 The limit resets tomorrow, or upgrade your plan."
            ),
            Self::CapabilityUnavailable { tier, capability } => write!(
                f,
                "{capability} is not available on the {tier} plan. Upgrade to use it."
            ),
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Snapshot of a user's plan and consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub tier: PlanTier,
    pub tokens_used: u64,
    pub tokens_limit: Limit,
    pub assets_used: u64,
    pub assets_limit: Limit,
    pub capabilities: Vec<Capability>,
    pub reset_date: NaiveDate,
}

impl UsageReport {
    pub fn tokens_remaining(&self) -> Option<u64> {
        self.tokens_limit.remaining(self.tokens_used)
    }

    pub fn assets_remaining(&self) -> Option<u64> {
        self.assets_limit.remaining(self.assets_used)
    }
}

/// Gates and records consumption against the plan table.
#[derive(Debug, Clone, Default)]
pub struct QuotaEnforcer {
    plans: PlanTable,
}

impl QuotaEnforcer {
    pub fn new(plans: PlanTable) -> Self {
        Self { plans }
    }

    pub fn plans(&self) -> &PlanTable {
        &self.plans
    }

    /// A fresh Free-plan record for a user seen for the first time.
    pub fn new_record(&self, today: NaiveDate) -> UsageRecord {
        let plan = self.plans.get(PlanTier::Free);
        UsageRecord {
            tier: PlanTier::Free,
            tokens_used: 0,
            tokens_limit: plan.tokens_limit,
            assets_used: 0,
            assets_limit: plan.assets_limit,
            reset_date: today,
        }
    }

    /// Zero both counters if the period has rolled over. Limits are refreshed
    /// from the plan table at the same time.
    pub fn apply_lazy_reset(&self, usage: &mut UsageRecord, today: NaiveDate) -> bool {
        if usage.reset_date >= today {
            return false;
        }

        let plan = self.plans.get(usage.tier);
        usage.tokens_used = 0;
        usage.assets_used = 0;
        usage.tokens_limit = plan.tokens_limit;
        usage.assets_limit = plan.assets_limit;
        usage.reset_date = today;
        true
    }

    /// Reset if due, then decide whether `kind` may proceed.
    ///
    /// This is a limit-reached check, not a reservation: a request admitted
    /// just under the limit may finish above it.
    pub fn check_allowed(
        &self,
        usage: &mut UsageRecord,
        kind: RequestKind,
        today: NaiveDate,
    ) -> Decision {
        if self.apply_lazy_reset(usage, today) {
            tracing::debug!(tier = %usage.tier, "Quota period rolled over");
        }

        if usage.tier == PlanTier::Pro {
            return Decision::Allow;
        }

        let capability = kind.capability();
        if !self.plans.get(usage.tier).allows(capability) {
            return Decision::Deny(DenyReason::CapabilityUnavailable {
                tier: usage.tier,
                capability,
            });
        }

        if let Some(counter) = kind.usage_kind() {
            if let Limit::Limited(limit) = usage.limit(counter) {
                if usage.used(counter) >= limit {
                    return Decision::Deny(DenyReason::LimitReached {
                        tier: usage.tier,
                        kind: counter,
                        limit,
                    });
                }
            }
        }

        Decision::Allow
    }

    /// Add measured consumption. Counters never decrease.
    pub fn record(usage: &mut UsageRecord, kind: UsageKind, amount: u64) {
        let counter = match kind {
            UsageKind::Tokens => &mut usage.tokens_used,
            UsageKind::Assets => &mut usage.assets_used,
        };
        *counter = counter.saturating_add(amount);
    }

    /// Switch tier and adopt its limits. Counters are kept.
    pub fn set_plan(&self, usage: &mut UsageRecord, tier: PlanTier) {
        let plan = self.plans.get(tier);
        usage.tier = tier;
        usage.tokens_limit = plan.tokens_limit;
        usage.assets_limit = plan.assets_limit;
    }

    /// Reset if due, then describe the record.
    pub fn report(&self, usage: &mut UsageRecord, today: NaiveDate) -> UsageReport {
        self.apply_lazy_reset(usage, today);
        UsageReport {
            tier: usage.tier,
            tokens_used: usage.tokens_used,
            tokens_limit: usage.tokens_limit,
            assets_used: usage.assets_used,
            assets_limit: usage.assets_limit,
            capabilities: self.plans.get(usage.tier).capabilities.clone(),
            reset_date: usage.reset_date,
        }
    }
}
