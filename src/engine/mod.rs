//! Progression Engine
//!
//! Command objects and the async engine facade that runs them against
//! the transactional store.

pub mod commands;
pub mod service;

pub use commands::{
    BatchOutcome, Command, Context, GameOutcome, ProgressSummary, Registration, SweepReport,
};
pub use service::ProgressionEngine;
