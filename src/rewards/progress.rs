//! Player Progress Records
//!
//! One [`PlayerProgress`] per player. Uses BTreeMap/BTreeSet so snapshots
//! and hashes see a stable iteration order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::clock::DayKey;
use crate::core::ids::{ArtifactId, PlayerId, RecordId};
use crate::rewards::modes::GameMode;
use crate::rewards::ordering::FamilyKey;

/// Per-mode daily gate marker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMarker {
    /// Day of the most recent recorded play.
    pub last_played: Option<DayKey>,
    /// Plays recorded on `last_played`. Meaningless on any other day.
    pub attempts_today: u32,
}

/// Per-mode lifetime counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStats {
    /// Games recorded.
    pub games_played: u64,
    /// Games counted as wins.
    pub games_won: u64,
    /// Correct answers across all games.
    pub correct_answers: u64,
    /// Incorrect answers across all games.
    pub incorrect_answers: u64,
    /// Question packs completed.
    pub completions: u64,
    /// Consecutive days played, ending on `last_streak_day`.
    pub current_streak: u32,
    /// Longest streak ever reached.
    pub best_streak: u32,
    /// Last day that counted towards the streak.
    pub last_streak_day: Option<DayKey>,
}

impl GameStats {
    /// Count `today` towards the day streak.
    ///
    /// Same day keeps the streak, the following day extends it, any gap
    /// restarts it at 1.
    pub fn touch_streak(&mut self, today: DayKey) {
        match self.last_streak_day {
            Some(day) if day == today => {}
            Some(day) if Some(day) == today.previous() => self.current_streak += 1,
            _ => self.current_streak = 1,
        }
        self.last_streak_day = Some(today);
        self.best_streak = self.best_streak.max(self.current_streak);
    }
}

/// Progress through one question family in a batch-synced mode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Questions answered so far and whether the answer was correct.
    pub answered: BTreeMap<RecordId, bool>,
    /// Whether the pack has been recorded as completed.
    pub completed: bool,
}

impl BatchProgress {
    /// Unique questions answered.
    pub fn total(&self) -> u32 {
        self.answered.len() as u32
    }
}

/// Everything the engine tracks about one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProgress {
    /// Owner.
    pub player_id: PlayerId,
    /// Cumulative XP.
    pub xp: u64,
    /// Currency balance.
    pub currency: u64,
    /// Artifacts unlocked so far. Only ever grows between resets.
    pub unlocked: BTreeSet<ArtifactId>,
    /// Daily gate markers per mode.
    pub daily: BTreeMap<GameMode, DailyMarker>,
    /// Lifetime counters per mode.
    pub stats: BTreeMap<GameMode, GameStats>,
    /// Batch sync progress per question family.
    pub batches: BTreeMap<FamilyKey, BatchProgress>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl PlayerProgress {
    /// Fresh record with every counter at zero.
    pub fn new(player_id: PlayerId, now: DateTime<Utc>) -> Self {
        Self {
            player_id,
            xp: 0,
            currency: 0,
            unlocked: BTreeSet::new(),
            daily: BTreeMap::new(),
            stats: BTreeMap::new(),
            batches: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Zero the record in place (admin reset). Identity and creation time survive.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = Self {
            created_at: self.created_at,
            ..Self::new(self.player_id, now)
        };
    }

    /// Lifetime stats for a mode, created on first use.
    pub fn stats_mut(&mut self, mode: GameMode) -> &mut GameStats {
        self.stats.entry(mode).or_default()
    }
}
