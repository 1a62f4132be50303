//! Game modes and raw play results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A daily/limited game mode.
///
/// Serialized as its snake_case name so it can key JSON maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum GameMode {
    /// One word-guess puzzle per day.
    DailyWord,
    /// Timed word search, two boards per day.
    WordSearch,
    /// Math facts sprint, scored by correct answers.
    MathSprint,
    /// Question packs synced in batches.
    LearningPath,
}

/// How a mode's reward is computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardKind {
    /// Win/lose with a bounded guess count.
    Guess,
    /// Items found against a countdown.
    TimedSearch,
    /// Flat rate per correct answer.
    CorrectCount,
    /// Incremental progress clamped by the anti-cheat validator.
    Batch,
}

impl GameMode {
    /// All modes, in declaration order.
    pub const ALL: [GameMode; 4] = [
        GameMode::DailyWord,
        GameMode::WordSearch,
        GameMode::MathSprint,
        GameMode::LearningPath,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::DailyWord => "daily_word",
            GameMode::WordSearch => "word_search",
            GameMode::MathSprint => "math_sprint",
            GameMode::LearningPath => "learning_path",
        }
    }

    /// Reward shape for this mode.
    pub fn reward_kind(self) -> RewardKind {
        match self {
            GameMode::DailyWord => RewardKind::Guess,
            GameMode::WordSearch => RewardKind::TimedSearch,
            GameMode::MathSprint => RewardKind::CorrectCount,
            GameMode::LearningPath => RewardKind::Batch,
        }
    }

    /// Attempts allowed per calendar day. `None` means unlimited.
    pub fn max_attempts_per_day(self) -> Option<u32> {
        match self {
            GameMode::DailyWord => Some(1),
            GameMode::WordSearch => Some(2),
            GameMode::MathSprint => Some(3),
            GameMode::LearningPath => None,
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown game mode: {s}"))
    }
}

impl From<GameMode> for String {
    fn from(mode: GameMode) -> Self {
        mode.as_str().to_string()
    }
}

impl TryFrom<String> for GameMode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Board difficulty for timed search games.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Small board, long timer.
    Easy,
    /// Medium board.
    Medium,
    /// Large board, short timer.
    Hard,
}

/// Raw result of one finished game, as reported by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameResult {
    /// Guess game outcome.
    Guess {
        /// Whether the word was found.
        won: bool,
        /// Guesses used.
        guesses: u32,
        /// Whether a hint was revealed.
        hint_used: bool,
    },
    /// Timed search outcome.
    TimedSearch {
        /// Board difficulty.
        difficulty: Difficulty,
        /// Items found before the timer ran out.
        items_found: u32,
        /// Seconds left on the timer.
        time_remaining_secs: u32,
    },
    /// Correct-count outcome.
    CorrectCount {
        /// Correct answers.
        correct: u32,
        /// Questions answered.
        answered: u32,
    },
}

impl GameResult {
    /// Reward shape this result carries.
    pub fn kind(&self) -> RewardKind {
        match self {
            GameResult::Guess { .. } => RewardKind::Guess,
            GameResult::TimedSearch { .. } => RewardKind::TimedSearch,
            GameResult::CorrectCount { .. } => RewardKind::CorrectCount,
        }
    }

    /// Whether the game counts as a win for lifetime stats.
    pub fn is_win(&self) -> bool {
        match self {
            GameResult::Guess { won, .. } => *won,
            GameResult::TimedSearch { items_found, .. } => *items_found > 0,
            GameResult::CorrectCount { correct, .. } => *correct > 0,
        }
    }

    /// (correct, incorrect) answers for lifetime stats.
    pub fn answer_counts(&self) -> (u32, u32) {
        match self {
            GameResult::Guess { won, guesses, .. } => {
                let correct = u32::from(*won);
                (correct, guesses.saturating_sub(correct))
            }
            GameResult::TimedSearch { items_found, .. } => (*items_found, 0),
            GameResult::CorrectCount { correct, answered } => {
                (*correct, answered.saturating_sub(*correct))
            }
        }
    }
}
