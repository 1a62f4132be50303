//! Anti-Cheat Validator
//!
//! Batch syncs carry a client-claimed reward. The claim is never trusted:
//! the provable maximum is rebuilt from the attempts in the batch and the
//! claim is clamped to it.

use serde::{Deserialize, Serialize};

use crate::core::ids::RecordId;
use crate::rewards::calculator::Reward;

/// One answered question reported in a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// Question answered.
    pub id: RecordId,
    /// Whether the answer was correct.
    pub correct: bool,
}

impl Attempt {
    /// Construct an attempt.
    pub fn new(id: impl Into<RecordId>, correct: bool) -> Self {
        Self { id: id.into(), correct }
    }
}

/// Per-answer reward rates for batch modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchRates {
    /// Earned per correct answer.
    pub per_correct: Reward,
    /// Earned per incorrect answer (participation).
    pub per_incorrect: Reward,
}

/// Rates for learning-path question packs.
pub const LEARNING_PATH_RATES: BatchRates = BatchRates {
    per_correct: Reward::new(10, 2),
    per_incorrect: Reward::new(2, 0),
};

/// Result of clamping a claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClampOutcome {
    /// Reward actually granted.
    pub validated: Reward,
    /// Upper bound derived from the batch.
    pub max_possible: Reward,
    /// Whether the claim exceeded the bound in any component.
    pub clamped: bool,
}

/// `correct * perCorrect + incorrect * perIncorrect` over `attempts`.
pub fn max_possible(attempts: &[Attempt], rates: &BatchRates) -> Reward {
    let correct = attempts.iter().filter(|a| a.correct).count() as u64;
    let incorrect = attempts.len() as u64 - correct;
    Reward::new(
        correct * rates.per_correct.xp + incorrect * rates.per_incorrect.xp,
        correct * rates.per_correct.currency + incorrect * rates.per_incorrect.currency,
    )
}

/// Clamp `claimed` to what `attempts` can provably earn. Empty batch ⇒ zero.
pub fn clamp(claimed: Reward, attempts: &[Attempt], rates: &BatchRates) -> ClampOutcome {
    let max_possible = max_possible(attempts, rates);
    let validated = claimed.min(max_possible);
    ClampOutcome {
        validated,
        max_possible,
        clamped: validated != claimed,
    }
}
