//! Core deterministic primitives.
//!
//! Identifiers and the day boundary. Nothing here reads the wall clock
//! except [`clock::SystemClock`].

pub mod clock;
pub mod ids;

// Re-export core types
pub use clock::{Clock, DayBoundary, DayKey, ManualClock, SystemClock};
pub use ids::{ArtifactId, PlayerId, RecordId, ViolationId};
