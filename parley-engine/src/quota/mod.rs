//! Quota Enforcer: per-user daily allowances by plan tier.
//!
//! The enforcer is a pure algorithm over a [`UsageRecord`]. Atomicity of
//! reset-then-check and of recording comes from running it inside
//! [`crate::store::SessionStore::update_usage`].

mod enforcer;
mod plan;

pub use enforcer::{Decision, DenyReason, QuotaEnforcer, RequestKind, UsageKind, UsageRecord, UsageReport};
pub use plan::{Capability, Limit, PlanDefinition, PlanTable, PlanTier};
