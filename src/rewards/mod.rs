//! Game Economy Module
//!
//! Deterministic progression and reward rules. Nothing here touches the
//! wall clock or the store; callers pass `now` and the records to mutate.
//!
//! ## Module Structure
//!
//! - `modes`: game modes and raw results
//! - `calculator`: per-game XP/coin formulas
//! - `anticheat`: batch claim clamping
//! - `progress`: player progress records
//! - `ledger`: XP/currency deltas and artifact unlocks
//! - `daily`: daily eligibility gate
//! - `ordering`: dense sibling ordering
//! - `ratelimit`: per-action counters and violations

pub mod anticheat;
pub mod calculator;
pub mod daily;
pub mod ledger;
pub mod modes;
pub mod ordering;
pub mod progress;
pub mod ratelimit;

// Re-export key types
pub use anticheat::{Attempt, BatchRates, ClampOutcome, LEARNING_PATH_RATES};
pub use calculator::Reward;
pub use daily::{DailyEligibilityGate, Eligibility};
pub use ledger::{Delta, LedgerOutcome, LevelTable, LevelThreshold, ProgressionLedger};
pub use modes::{Difficulty, GameMode, GameResult, RewardKind};
pub use ordering::{ContentRecord, Direction, FamilyKey};
pub use progress::{BatchProgress, DailyMarker, GameStats, PlayerProgress};
pub use ratelimit::{RateAction, RateLimitCounter, RateLimitStatus, RateLimitViolation, RatePolicy};
