//! Rate Limiter
//!
//! Fixed-policy sliding-window counters per (identifier, action), plus the
//! coalesced violation records admins review. The functions here are pure:
//! they take the stored rows and return what to write back. The store
//! layer decides what gets persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::ids::ViolationId;

/// Rate-limited actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateAction {
    /// Token authentication (keyed by peer address).
    Auth,
    /// Player registration.
    Register,
    /// Eligibility lookups.
    CheckEligibility,
    /// Single game result submission.
    SubmitGame,
    /// Batch progress sync.
    SyncProgress,
    /// Progress reads.
    ReadProgress,
    /// Content reorder.
    Reorder,
    /// Other admin actions.
    Admin,
}

/// `{max, window}` for one action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    /// Calls allowed per window.
    pub max: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RatePolicy {
    /// Window as a chrono duration.
    pub fn window(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX / 1_000_000))
    }
}

impl RateAction {
    /// Every action.
    pub const ALL: [RateAction; 8] = [
        RateAction::Auth,
        RateAction::Register,
        RateAction::CheckEligibility,
        RateAction::SubmitGame,
        RateAction::SyncProgress,
        RateAction::ReadProgress,
        RateAction::Reorder,
        RateAction::Admin,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RateAction::Auth => "auth",
            RateAction::Register => "register",
            RateAction::CheckEligibility => "check_eligibility",
            RateAction::SubmitGame => "submit_game",
            RateAction::SyncProgress => "sync_progress",
            RateAction::ReadProgress => "read_progress",
            RateAction::Reorder => "reorder",
            RateAction::Admin => "admin",
        }
    }

    /// Static policy.
    pub const fn policy(self) -> RatePolicy {
        match self {
            RateAction::Auth => RatePolicy { max: 10, window_ms: 300_000 },
            RateAction::Register => RatePolicy { max: 5, window_ms: 600_000 },
            RateAction::CheckEligibility => RatePolicy { max: 60, window_ms: 60_000 },
            RateAction::SubmitGame => RatePolicy { max: 10, window_ms: 60_000 },
            RateAction::SyncProgress => RatePolicy { max: 30, window_ms: 60_000 },
            RateAction::ReadProgress => RatePolicy { max: 60, window_ms: 60_000 },
            RateAction::Reorder => RatePolicy { max: 30, window_ms: 60_000 },
            RateAction::Admin => RatePolicy { max: 30, window_ms: 60_000 },
        }
    }
}

impl fmt::Display for RateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// COUNTERS
// =============================================================================

/// Stored counter for one (identifier, action).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCounter {
    /// Caller identity (player id or peer address).
    pub identifier: String,
    /// Limited action.
    pub action: RateAction,
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
    /// Calls counted in the current window.
    pub count: u32,
}

impl RateLimitCounter {
    /// When the current window ends.
    pub fn reset_at(&self, policy: &RatePolicy) -> DateTime<Utc> {
        self.window_start + policy.window()
    }

    /// Whether the window has fully elapsed at `now`.
    pub fn is_expired(&self, policy: &RatePolicy, now: DateTime<Utc>) -> bool {
        now - self.window_start > policy.window()
    }
}

/// Budget left after an allowed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Always true for a returned status.
    pub allowed: bool,
    /// Calls left in this window.
    pub remaining: u32,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

/// Outcome of evaluating one call against a counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateDecision {
    /// Call allowed; persist `counter`.
    Allowed {
        /// Counter row to write.
        counter: RateLimitCounter,
        /// Remaining budget.
        status: RateLimitStatus,
    },
    /// Call rejected; the stored counter stays as it was.
    Rejected {
        /// Count the call would have reached.
        observed: u32,
        /// When the window resets.
        reset_at: DateTime<Utc>,
    },
}

/// Evaluate one call.
///
/// No row ⇒ count 1. Window elapsed (`now - start > window`) ⇒ count 1 and a
/// new window. Otherwise increment, rejecting when the new count exceeds
/// `max`.
pub fn evaluate(
    existing: Option<&RateLimitCounter>,
    identifier: &str,
    action: RateAction,
    policy: &RatePolicy,
    now: DateTime<Utc>,
) -> RateDecision {
    let counter = match existing {
        Some(c) if !c.is_expired(policy, now) => {
            let next = c.count.saturating_add(1);
            if next > policy.max {
                return RateDecision::Rejected {
                    observed: next,
                    reset_at: c.reset_at(policy),
                };
            }
            RateLimitCounter { count: next, ..c.clone() }
        }
        _ => RateLimitCounter {
            identifier: identifier.to_string(),
            action,
            window_start: now,
            count: 1,
        },
    };

    let status = RateLimitStatus {
        allowed: true,
        remaining: policy.max.saturating_sub(counter.count),
        reset_at: counter.reset_at(policy),
    };
    RateDecision::Allowed { counter, status }
}

// =============================================================================
// VIOLATIONS
// =============================================================================

/// Admin-visible record of an over-budget caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitViolation {
    /// Record id.
    pub id: ViolationId,
    /// Caller identity.
    pub identifier: String,
    /// Limited action.
    pub action: RateAction,
    /// Policy limit at the time.
    pub limit: u32,
    /// Highest count observed.
    pub observed_count: u32,
    /// Rejections folded into this record.
    pub occurrences: u32,
    /// First rejection.
    pub first_seen: DateTime<Utc>,
    /// Latest rejection.
    pub last_seen: DateTime<Utc>,
    /// Whether an admin has read it since the last update.
    pub read: bool,
}

/// Fold a rejection into `recent` (the latest record for the same
/// action and identifier) or start a new record.
///
/// Rejections within `coalesce` of the latest one update it and mark it
/// unread again.
pub fn coalesce_violation(
    recent: Option<&RateLimitViolation>,
    identifier: &str,
    action: RateAction,
    limit: u32,
    observed: u32,
    now: DateTime<Utc>,
    coalesce: Duration,
) -> RateLimitViolation {
    match recent {
        Some(v) if now - v.last_seen <= coalesce => RateLimitViolation {
            observed_count: v.observed_count.max(observed),
            occurrences: v.occurrences.saturating_add(1),
            last_seen: now,
            read: false,
            limit,
            ..v.clone()
        },
        _ => RateLimitViolation {
            id: ViolationId::new_v4(),
            identifier: identifier.to_string(),
            action,
            limit,
            observed_count: observed,
            occurrences: 1,
            first_seen: now,
            last_seen: now,
            read: false,
        },
    }
}
