//! Engine errors.
//!
//! Every error is scoped to one request and terminal for it: nothing is
//! retried inside the engine and no partial effect survives a failure.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::network::protocol::ErrorCode;
use crate::rewards::modes::GameMode;
use crate::rewards::ratelimit::RateAction;

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Token missing, expired or rejected.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller lacks the admin role.
    #[error("admin role required")]
    Forbidden,

    /// Referenced player, family or record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of thing was looked up.
        kind: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// Caller is over budget for an action.
    #[error("rate limited on {action}: limit {limit} per window, retry after {}ms", .retry_after.as_millis())]
    RateLimited {
        /// Limited action.
        action: RateAction,
        /// Maximum calls per window.
        limit: u32,
        /// Time until the window resets.
        retry_after: Duration,
    },

    /// Out-of-range or malformed input, rejected before any calculation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Daily quota for the mode is already used.
    #[error("{mode} already completed today")]
    AlreadyCompletedToday {
        /// Mode whose quota is consumed.
        mode: GameMode,
        /// When the quota becomes available again.
        resets_at: DateTime<Utc>,
    },

    /// Snapshot load/save failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Shorthand for a not-found error.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }

    /// Shorthand for an invalid-input error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated(_) => ErrorCode::NotAuthenticated,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::AlreadyCompletedToday { .. } => ErrorCode::AlreadyCompletedToday,
            Self::Storage(_) => ErrorCode::InternalError,
        }
    }

    /// Milliseconds the caller should wait before retrying, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(retry_after.as_millis() as u64),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
