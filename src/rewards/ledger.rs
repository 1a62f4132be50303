//! Progression Ledger
//!
//! Applies XP/currency deltas to a [`PlayerProgress`] and keeps the unlocked
//! artifact set in step with the level threshold table. The unlock scan is
//! idempotent and only ever adds, so the final set depends on nothing but
//! the XP total reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::ids::ArtifactId;
use crate::rewards::calculator::Reward;
use crate::rewards::progress::PlayerProgress;

/// One row of the level table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelThreshold {
    /// Level number.
    pub level: u32,
    /// Cumulative XP needed to reach it.
    pub xp_required: u64,
    /// Artifact granted on reaching it, if any.
    pub artifact: Option<ArtifactId>,
}

impl LevelThreshold {
    fn new(level: u32, xp_required: u64, artifact: Option<&str>) -> Self {
        Self {
            level,
            xp_required,
            artifact: artifact.map(ArtifactId::new),
        }
    }
}

/// Ordered level thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelTable {
    levels: Vec<LevelThreshold>,
}

impl Default for LevelTable {
    fn default() -> Self {
        Self::new(vec![
            LevelThreshold::new(1, 0, None),
            LevelThreshold::new(2, 100, Some("paper-crown")),
            LevelThreshold::new(3, 250, Some("star-wand")),
            LevelThreshold::new(4, 500, Some("owl-companion")),
            LevelThreshold::new(5, 900, Some("rainbow-cape")),
            LevelThreshold::new(6, 1400, None),
            LevelThreshold::new(7, 2000, Some("golden-quill")),
            LevelThreshold::new(8, 2800, None),
            LevelThreshold::new(9, 3800, Some("dragon-egg")),
            LevelThreshold::new(10, 5000, Some("wizard-hat")),
        ])
    }
}

impl LevelTable {
    /// Build a table, sorting rows by `(xp_required, level)`.
    pub fn new(mut levels: Vec<LevelThreshold>) -> Self {
        levels.sort_by_key(|l| (l.xp_required, l.level));
        Self { levels }
    }

    /// Rows in threshold order.
    pub fn levels(&self) -> &[LevelThreshold] {
        &self.levels
    }

    /// Highest level whose threshold `xp` meets (0 if none).
    pub fn level_for(&self, xp: u64) -> u32 {
        self.levels
            .iter()
            .filter(|l| xp >= l.xp_required)
            .map(|l| l.level)
            .max()
            .unwrap_or(0)
    }

    /// Smallest threshold above `xp`, if any.
    pub fn next_threshold(&self, xp: u64) -> Option<u64> {
        self.levels.iter().map(|l| l.xp_required).find(|req| *req > xp)
    }

    /// Artifacts whose thresholds `xp` meets, in threshold order.
    pub fn artifacts_for(&self, xp: u64) -> impl Iterator<Item = &ArtifactId> {
        self.levels
            .iter()
            .take_while(move |l| xp >= l.xp_required)
            .filter_map(|l| l.artifact.as_ref())
    }
}

/// Signed XP/currency change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// XP change.
    pub xp: i64,
    /// Currency change.
    pub currency: i64,
}

impl From<Reward> for Delta {
    fn from(reward: Reward) -> Self {
        Self {
            xp: i64::try_from(reward.xp).unwrap_or(i64::MAX),
            currency: i64::try_from(reward.currency).unwrap_or(i64::MAX),
        }
    }
}

/// State after a ledger mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerOutcome {
    /// XP actually added.
    pub xp_awarded: u64,
    /// Currency actually added.
    pub currency_awarded: u64,
    /// XP total after the mutation.
    pub new_xp: u64,
    /// Currency balance after the mutation.
    pub new_currency: u64,
    /// Level after the mutation.
    pub level: u32,
    /// Artifacts added by this mutation.
    pub newly_unlocked: Vec<ArtifactId>,
}

/// Ledger operations over one player's progress record.
#[derive(Clone, Copy, Debug)]
pub struct ProgressionLedger<'a> {
    table: &'a LevelTable,
    coin_ceiling: u64,
}

impl<'a> ProgressionLedger<'a> {
    /// Ledger over `table` with a per-operation coin ceiling.
    pub fn new(table: &'a LevelTable, coin_ceiling: u64) -> Self {
        Self { table, coin_ceiling }
    }

    /// Apply a signed delta. Totals floor at zero; unlocks are never removed.
    pub fn apply_delta(&self, progress: &mut PlayerProgress, delta: Delta, now: DateTime<Utc>) -> LedgerOutcome {
        let old_xp = progress.xp;
        let old_currency = progress.currency;

        progress.xp = add_floored(progress.xp, delta.xp);
        progress.currency = add_floored(progress.currency, delta.currency);
        progress.updated_at = now;

        let newly_unlocked = self.sync_unlocks(progress);

        LedgerOutcome {
            xp_awarded: progress.xp.saturating_sub(old_xp),
            currency_awarded: progress.currency.saturating_sub(old_currency),
            new_xp: progress.xp,
            new_currency: progress.currency,
            level: self.table.level_for(progress.xp),
            newly_unlocked,
        }
    }

    /// Apply an earned reward, capping the coins of this single operation.
    pub fn apply_earning(&self, progress: &mut PlayerProgress, reward: Reward, now: DateTime<Utc>) -> LedgerOutcome {
        let capped = Reward::new(reward.xp, reward.currency.min(self.coin_ceiling));
        self.apply_delta(progress, capped.into(), now)
    }

    /// Add every artifact the current XP has earned and the set lacks.
    ///
    /// Safe to run any number of times.
    pub fn sync_unlocks(&self, progress: &mut PlayerProgress) -> Vec<ArtifactId> {
        let mut added = Vec::new();
        for artifact in self.table.artifacts_for(progress.xp) {
            if progress.unlocked.insert(artifact.clone()) {
                info!(
                    "Player {} unlocked {} at {} XP",
                    progress.player_id.short(),
                    artifact,
                    progress.xp
                );
                added.push(artifact.clone());
            }
        }
        added
    }
}

fn add_floored(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::PlayerId;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn progress() -> PlayerProgress {
        PlayerProgress::new(PlayerId::new([1; 16]), Utc::now())
    }

    fn table_with_x() -> LevelTable {
        LevelTable::new(vec![
            LevelThreshold::new(1, 0, None),
            LevelThreshold::new(2, 100, Some("X")),
            LevelThreshold::new(3, 200, Some("Y")),
        ])
    }

    #[test]
    fn test_crossing_threshold_unlocks() {
        let table = table_with_x();
        let ledger = ProgressionLedger::new(&table, 50);
        let mut p = progress();
        p.xp = 90;

        let out = ledger.apply_delta(&mut p, Delta { xp: 15, currency: 0 }, Utc::now());
        assert_eq!(out.new_xp, 105);
        assert_eq!(out.level, 2);
        assert_eq!(out.newly_unlocked, vec![ArtifactId::new("X")]);
        assert!(p.unlocked.contains(&ArtifactId::new("X")));
    }

    #[test]
    fn test_big_jump_unlocks_all_passed() {
        let table = table_with_x();
        let ledger = ProgressionLedger::new(&table, 50);
        let mut p = progress();
        let out = ledger.apply_delta(&mut p, Delta { xp: 250, currency: 0 }, Utc::now());
        assert_eq!(out.newly_unlocked.len(), 2);
    }

    #[test]
    fn test_floor_at_zero_and_unlocks_kept() {
        let table = table_with_x();
        let ledger = ProgressionLedger::new(&table, 50);
        let mut p = progress();
        ledger.apply_delta(&mut p, Delta { xp: 150, currency: 10 }, Utc::now());
        let out = ledger.apply_delta(&mut p, Delta { xp: -1000, currency: -1000 }, Utc::now());
        assert_eq!(out.new_xp, 0);
        assert_eq!(out.new_currency, 0);
        assert!(p.unlocked.contains(&ArtifactId::new("X")));
    }

    #[test]
    fn test_coin_ceiling() {
        let table = table_with_x();
        let ledger = ProgressionLedger::new(&table, 50);
        let mut p = progress();
        let out = ledger.apply_earning(&mut p, Reward::new(10, 400), Utc::now());
        assert_eq!(out.currency_awarded, 50);
        assert_eq!(out.xp_awarded, 10);
    }

    #[test]
    fn test_sync_unlocks_idempotent() {
        let table = table_with_x();
        let ledger = ProgressionLedger::new(&table, 50);
        let mut p = progress();
        p.xp = 500;
        assert_eq!(ledger.sync_unlocks(&mut p).len(), 2);
        assert!(ledger.sync_unlocks(&mut p).is_empty());
    }

    #[test]
    fn test_level_lookup() {
        let table = LevelTable::default();
        assert_eq!(table.level_for(0), 1);
        assert_eq!(table.level_for(99), 1);
        assert_eq!(table.level_for(100), 2);
        assert_eq!(table.level_for(1_000_000), 10);
        assert_eq!(table.next_threshold(100), Some(250));
        assert_eq!(table.next_threshold(5000), None);
    }

    proptest! {
        #[test]
        fn prop_unlocks_depend_only_on_total(
            mut deltas in proptest::collection::vec(0i64..400, 0..20),
        ) {
            let table = LevelTable::default();
            let ledger = ProgressionLedger::new(&table, 50);
            let now = Utc::now();

            let mut forward = progress();
            for d in &deltas {
                ledger.apply_delta(&mut forward, Delta { xp: *d, currency: 0 }, now);
            }

            deltas.reverse();
            let mut backward = progress();
            for d in &deltas {
                ledger.apply_delta(&mut backward, Delta { xp: *d, currency: 0 }, now);
            }

            let total: i64 = deltas.iter().sum();
            let mut oneshot = progress();
            ledger.apply_delta(&mut oneshot, Delta { xp: total, currency: 0 }, now);

            let expected: BTreeSet<ArtifactId> = table.artifacts_for(total as u64).cloned().collect();
            prop_assert_eq!(&forward.unlocked, &expected);
            prop_assert_eq!(&backward.unlocked, &expected);
            prop_assert_eq!(&oneshot.unlocked, &expected);
        }
    }
}
