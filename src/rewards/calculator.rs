//! Reward Calculator
//!
//! Pure, deterministic mapping from a raw game result to XP and coins.
//! All arithmetic is integer so every platform computes the same reward
//! for the same result. Inputs are clamped to their valid range here;
//! [`validate`] is the stricter boundary check the engine runs first.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::rewards::modes::{Difficulty, GameResult};

/// XP and coins earned by one operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    /// Experience points.
    pub xp: u64,
    /// In-app currency.
    pub currency: u64,
}

impl Reward {
    /// Construct a reward.
    pub const fn new(xp: u64, currency: u64) -> Self {
        Self { xp, currency }
    }

    /// Nothing earned.
    pub const ZERO: Reward = Reward::new(0, 0);

    /// Component-wise minimum.
    pub fn min(self, other: Reward) -> Reward {
        Reward::new(self.xp.min(other.xp), self.currency.min(other.currency))
    }
}

// =============================================================================
// GUESS GAMES
// =============================================================================

/// Most guesses a guess game allows.
pub const MAX_GUESSES: u32 = 6;

/// XP for a win, indexed by guesses used minus one.
pub const GUESS_XP: [u64; MAX_GUESSES as usize] = [30, 20, 15, 10, 8, 5];

/// Coins for a win, indexed by guesses used minus one.
pub const GUESS_COINS: [u64; MAX_GUESSES as usize] = [10, 8, 6, 4, 3, 2];

/// Consolation reward on a loss.
pub const LOSS_REWARD: Reward = Reward::new(3, 1);

/// Reward for a guess game. A hint halves the reward (rounding down).
pub fn guess_reward(won: bool, guesses: u32, hint_used: bool) -> Reward {
    let base = if won {
        let idx = (guesses.clamp(1, MAX_GUESSES) - 1) as usize;
        Reward::new(GUESS_XP[idx], GUESS_COINS[idx])
    } else {
        LOSS_REWARD
    };

    if hint_used {
        Reward::new(base.xp / 2, base.currency / 2)
    } else {
        base
    }
}

// =============================================================================
// TIMED SEARCH
// =============================================================================

/// Per-difficulty constants for a timed search board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchBoard {
    /// XP per item found.
    pub xp_per_item: u64,
    /// Coins per item found.
    pub coins_per_item: u64,
    /// Timer length in seconds.
    pub max_time_secs: u32,
    /// Items hidden on the board.
    pub items: u32,
    /// Session XP ceiling.
    pub xp_cap: u64,
    /// Session coin ceiling.
    pub coin_cap: u64,
}

impl Difficulty {
    /// Board constants for this difficulty.
    pub const fn board(self) -> SearchBoard {
        match self {
            Difficulty::Easy => SearchBoard {
                xp_per_item: 10,
                coins_per_item: 2,
                max_time_secs: 600,
                items: 8,
                xp_cap: 50,
                coin_cap: 10,
            },
            Difficulty::Medium => SearchBoard {
                xp_per_item: 15,
                coins_per_item: 3,
                max_time_secs: 480,
                items: 10,
                xp_cap: 75,
                coin_cap: 15,
            },
            Difficulty::Hard => SearchBoard {
                xp_per_item: 20,
                coins_per_item: 4,
                max_time_secs: 360,
                items: 12,
                xp_cap: 100,
                coin_cap: 20,
            },
        }
    }
}

/// `round(base * (1 + 0.5 * remaining / max))`, rounding halves up.
///
/// Computed as `round(base * (2*max + remaining) / (2*max))` in integers.
pub fn apply_time_bonus(base: u64, remaining_secs: u32, max_time_secs: u32) -> u64 {
    if max_time_secs == 0 {
        return base;
    }
    let max = u128::from(max_time_secs);
    let remaining = u128::from(remaining_secs.min(max_time_secs));
    let num = u128::from(base) * (2 * max + remaining);
    let den = 2 * max;
    ((2 * num + den) / (2 * den)) as u64
}

/// `min(cap, round(perItem * itemsFound * timeBonus))` for XP and coins.
pub fn timed_search_reward(difficulty: Difficulty, items_found: u32, time_remaining_secs: u32) -> Reward {
    let board = difficulty.board();
    let found = u64::from(items_found.min(board.items));

    let xp = apply_time_bonus(board.xp_per_item * found, time_remaining_secs, board.max_time_secs);
    let coins = apply_time_bonus(board.coins_per_item * found, time_remaining_secs, board.max_time_secs);

    Reward::new(xp.min(board.xp_cap), coins.min(board.coin_cap))
}

// =============================================================================
// CORRECT-COUNT GAMES
// =============================================================================

/// Most questions in one sprint.
pub const MAX_SPRINT_QUESTIONS: u32 = 100;

/// Flat rate per correct answer.
pub const PER_CORRECT: Reward = Reward::new(5, 1);

/// `correct * rate`, uncapped.
pub fn correct_count_reward(correct: u32) -> Reward {
    let n = u64::from(correct);
    Reward::new(n * PER_CORRECT.xp, n * PER_CORRECT.currency)
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Reward for any single-shot game result.
pub fn compute(result: &GameResult) -> Reward {
    match *result {
        GameResult::Guess { won, guesses, hint_used } => guess_reward(won, guesses, hint_used),
        GameResult::TimedSearch { difficulty, items_found, time_remaining_secs } => {
            timed_search_reward(difficulty, items_found, time_remaining_secs)
        }
        GameResult::CorrectCount { correct, answered } => correct_count_reward(correct.min(answered)),
    }
}

/// Reject out-of-range results before any calculation.
pub fn validate(result: &GameResult) -> EngineResult<()> {
    match *result {
        GameResult::Guess { won, guesses, .. } => {
            if won && !(1..=MAX_GUESSES).contains(&guesses) {
                return Err(EngineError::invalid(format!(
                    "winning guess count {guesses} outside 1..={MAX_GUESSES}"
                )));
            }
            if !won && guesses > MAX_GUESSES {
                return Err(EngineError::invalid(format!(
                    "guess count {guesses} exceeds {MAX_GUESSES}"
                )));
            }
        }
        GameResult::TimedSearch { difficulty, items_found, time_remaining_secs } => {
            let board = difficulty.board();
            if items_found > board.items {
                return Err(EngineError::invalid(format!(
                    "{items_found} items found on a board of {}",
                    board.items
                )));
            }
            if time_remaining_secs > board.max_time_secs {
                return Err(EngineError::invalid(format!(
                    "time remaining {time_remaining_secs}s exceeds {}s",
                    board.max_time_secs
                )));
            }
        }
        GameResult::CorrectCount { correct, answered } => {
            if correct > answered {
                return Err(EngineError::invalid(format!(
                    "{correct} correct out of {answered} answered"
                )));
            }
            if answered > MAX_SPRINT_QUESTIONS {
                return Err(EngineError::invalid(format!(
                    "{answered} answers exceeds {MAX_SPRINT_QUESTIONS}"
                )));
            }
        }
    }
    Ok(())
}
