//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON, tagged by `type`. Batch progress payloads may also
//! arrive as binary (bincode) frames, since they are the bulkiest request.

use serde::{Deserialize, Serialize};

use crate::core::ids::{RecordId, ViolationId};
use crate::engine::{BatchOutcome, GameOutcome, ProgressSummary, Registration};
use crate::error::EngineError;
use crate::rewards::anticheat::Attempt;
use crate::rewards::calculator::Reward;
use crate::rewards::daily::Eligibility;
use crate::rewards::modes::{GameMode, GameResult};
use crate::rewards::ordering::{ContentRecord, Direction, FamilyKey};
use crate::rewards::ratelimit::{RateAction, RateLimitViolation};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with a bearer token.
    Auth(AuthRequest),

    /// Create the caller's progress record.
    Register,

    /// May the caller play `mode` now?
    CheckEligibility {
        /// Mode to check.
        mode: GameMode,
    },

    /// Report a finished single-shot game.
    RecordGameResult {
        /// Mode played.
        mode: GameMode,
        /// Raw result.
        result: GameResult,
    },

    /// Sync a batch of answered questions.
    SyncProgress(SyncProgressRequest),

    /// Read the caller's progress.
    GetProgress,

    /// Move a content record within its family (admin).
    Reorder {
        /// Family to reorder.
        family: FamilyKey,
        /// Record to move.
        member: RecordId,
        /// Move direction.
        direction: Direction,
    },

    /// Register or update a content record (admin).
    UpsertContent(ContentRecord),

    /// List rate-limit violations (admin).
    ListViolations {
        /// Only unread records.
        #[serde(default)]
        unread_only: bool,
    },

    /// Mark a violation read (admin).
    MarkViolationRead {
        /// Violation to mark.
        id: ViolationId,
    },

    /// Zero a player's progress (admin).
    ResetPlayer {
        /// Player UUID.
        player_id: String,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Rate-limited action this message counts against. `None` for pings.
    pub fn rate_action(&self) -> Option<RateAction> {
        match self {
            ClientMessage::Auth(_) => Some(RateAction::Auth),
            ClientMessage::Register => Some(RateAction::Register),
            ClientMessage::CheckEligibility { .. } => Some(RateAction::CheckEligibility),
            ClientMessage::RecordGameResult { .. } => Some(RateAction::SubmitGame),
            ClientMessage::SyncProgress(_) => Some(RateAction::SyncProgress),
            ClientMessage::GetProgress => Some(RateAction::ReadProgress),
            ClientMessage::Reorder { .. } => Some(RateAction::Reorder),
            ClientMessage::UpsertContent(_)
            | ClientMessage::ListViolations { .. }
            | ClientMessage::MarkViolationRead { .. }
            | ClientMessage::ResetPlayer { .. } => Some(RateAction::Admin),
            ClientMessage::Ping { .. } => None,
        }
    }

    /// Whether the message needs the admin role.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            ClientMessage::Reorder { .. }
                | ClientMessage::UpsertContent(_)
                | ClientMessage::ListViolations { .. }
                | ClientMessage::MarkViolationRead { .. }
                | ClientMessage::ResetPlayer { .. }
        )
    }
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Bearer token from the identity provider.
    pub token: String,
    /// Client version for compatibility check.
    #[serde(default)]
    pub client_version: String,
}

/// Batch progress payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgressRequest {
    /// Batch mode.
    pub mode: GameMode,
    /// Question family answered.
    pub family: FamilyKey,
    /// Answers in this batch.
    pub attempts: Vec<Attempt>,
    /// Reward the client computed.
    pub claimed: Reward,
    /// Client reports the pack finished.
    pub is_complete: bool,
}

impl SyncProgressRequest {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Registration result.
    Registered(Registration),

    /// Eligibility answer.
    Eligibility(Eligibility),

    /// Reward for a recorded game.
    GameRecorded(GameOutcome),

    /// Result of a batch sync.
    ProgressSynced(BatchOutcome),

    /// Progress read.
    Progress(ProgressSummary),

    /// Family after a reorder.
    Reordered {
        /// Family reordered.
        family: FamilyKey,
        /// Records in their new order.
        records: Vec<ContentRecord>,
    },

    /// Stored content record.
    ContentSaved(ContentRecord),

    /// Violation listing.
    Violations {
        /// Records, newest first.
        violations: Vec<RateLimitViolation>,
    },

    /// Violation after being marked read.
    ViolationRead(RateLimitViolation),

    /// Progress after an admin reset.
    PlayerReset(ProgressSummary),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time in Unix milliseconds.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Resolved player UUID if successful.
    pub player_id: Option<String>,
    /// Whether the token carries the admin role.
    pub admin: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Milliseconds until a rate-limited call may be retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ServerError {
    /// Error without retry hint.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_ms: None,
        }
    }
}

impl From<&EngineError> for ServerError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            retry_after_ms: err.retry_after_ms(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Not authenticated.
    NotAuthenticated,
    /// Caller lacks the admin role.
    Forbidden,
    /// Player, family, record or violation not found.
    NotFound,
    /// Invalid input.
    InvalidInput,
    /// Daily quota for the mode is used up.
    AlreadyCompletedToday,
    /// Rate limited.
    RateLimited,
    /// Connection cap reached.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Error reply for `err`.
    pub fn error(err: &EngineError) -> Self {
        ServerMessage::Error(ServerError::from(err))
    }
}
