//! # Progression Server
//!
//! Progression and rewards engine for a children's learning app: XP,
//! coins, levels, artifact unlocks, once-per-day games, learning-path
//! batch sync and per-action rate limiting.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROGRESSION SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Identifiers and day boundary              │
//! │  ├── ids.rs      - Player/record/violation ids               │
//! │  └── clock.rs    - Injectable clock, local-day keys          │
//! │                                                              │
//! │  rewards/        - Progression rules (pure)                  │
//! │  ├── calculator.rs - Per-game XP/coin formulas               │
//! │  ├── anticheat.rs  - Batch claim clamping                    │
//! │  ├── ledger.rs     - Deltas, levels, artifact unlocks        │
//! │  ├── daily.rs      - Daily eligibility gate                  │
//! │  ├── ordering.rs   - Sibling content ordering                │
//! │  └── ratelimit.rs  - Windowed counters and violations        │
//! │                                                              │
//! │  store/          - Transactional in-memory tables            │
//! │  engine/         - Commands + async facade                   │
//! │                                                              │
//! │  network/        - WebSocket front end                       │
//! │  ├── server.rs   - Accept loop, sweeps                       │
//! │  ├── handler.rs  - Auth, rate limit, dispatch                │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - JWT session resolution                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Every engine operation runs as a single transaction against the
//! store: either all of its writes land or none do. Rule code never
//! reads the wall clock, so every formula is testable with a
//! [`core::ManualClock`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod network;
pub mod rewards;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use core::{Clock, DayBoundary, ManualClock, PlayerId, SystemClock};
pub use engine::ProgressionEngine;
pub use error::{EngineError, EngineResult};
pub use rewards::{GameMode, GameResult, LevelTable, RateAction};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
