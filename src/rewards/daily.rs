//! Daily Eligibility Gate
//!
//! Per (player, mode): Available -> Consumed -> (day rolls over) -> Available.
//! Nothing runs at midnight. The stored marker is compared with today's
//! key on every read, and a marker from any other day counts as zero
//! attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::clock::{DayBoundary, DayKey};
use crate::error::{EngineError, EngineResult};
use crate::rewards::modes::GameMode;
use crate::rewards::progress::{DailyMarker, PlayerProgress};

/// Answer to "may this player start this mode today?".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    /// Mode checked.
    pub mode: GameMode,
    /// Whether another attempt is allowed today.
    pub allowed: bool,
    /// Attempts already used today.
    pub attempts_today: u32,
    /// Daily quota, `None` when unlimited.
    pub max_attempts: Option<u32>,
    /// Next day boundary.
    pub resets_at: DateTime<Utc>,
}

/// Lazily evaluated daily quota.
#[derive(Clone, Copy, Debug)]
pub struct DailyEligibilityGate {
    boundary: DayBoundary,
}

impl DailyEligibilityGate {
    /// Gate keyed to `boundary`'s calendar days.
    pub fn new(boundary: DayBoundary) -> Self {
        Self { boundary }
    }

    /// Attempts used on `today`. A marker from another day counts as zero.
    pub fn attempts_on(marker: Option<&DailyMarker>, today: DayKey) -> u32 {
        match marker {
            Some(m) if m.last_played == Some(today) => m.attempts_today,
            _ => 0,
        }
    }

    /// Evaluate eligibility at `now`.
    pub fn check(&self, progress: &PlayerProgress, mode: GameMode, now: DateTime<Utc>) -> Eligibility {
        let today = self.boundary.day_key(now);
        let attempts_today = Self::attempts_on(progress.daily.get(&mode), today);
        let max_attempts = mode.max_attempts_per_day();
        let allowed = max_attempts.map_or(true, |max| attempts_today < max);

        debug!(
            "Eligibility {} for {}: {}/{:?} on {} -> {}",
            mode,
            progress.player_id.short(),
            attempts_today,
            max_attempts,
            today,
            allowed
        );

        Eligibility {
            mode,
            allowed,
            attempts_today,
            max_attempts,
            resets_at: self.boundary.next_rollover(now),
        }
    }

    /// Fail with `AlreadyCompletedToday` if the quota is used up.
    pub fn ensure_available(&self, progress: &PlayerProgress, mode: GameMode, now: DateTime<Utc>) -> EngineResult<()> {
        let eligibility = self.check(progress, mode, now);
        if eligibility.allowed {
            Ok(())
        } else {
            Err(EngineError::AlreadyCompletedToday {
                mode,
                resets_at: eligibility.resets_at,
            })
        }
    }

    /// Stamp a play. Returns attempts used today including this one.
    pub fn record_play(&self, progress: &mut PlayerProgress, mode: GameMode, now: DateTime<Utc>) -> u32 {
        let today = self.boundary.day_key(now);
        let marker = progress.daily.entry(mode).or_default();

        if marker.last_played != Some(today) {
            marker.attempts_today = 0;
        }
        marker.attempts_today += 1;
        marker.last_played = Some(today);
        progress.updated_at = now;

        marker.attempts_today
    }
}
