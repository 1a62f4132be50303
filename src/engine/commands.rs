//! Engine Commands
//!
//! Each operation is a command object executed against a [`Repository`]
//! inside one store transaction. Commands read everything they need
//! through the repository, so every delta is computed from state the
//! transaction itself observed. Returning `Err` discards all writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::ids::{ArtifactId, PlayerId, RecordId, ViolationId};
use crate::error::{EngineError, EngineResult};
use crate::rewards::anticheat::{self, Attempt, LEARNING_PATH_RATES};
use crate::rewards::calculator::{self, Reward};
use crate::rewards::daily::{DailyEligibilityGate, Eligibility};
use crate::rewards::ledger::ProgressionLedger;
use crate::rewards::modes::{GameMode, GameResult, RewardKind};
use crate::rewards::ordering::{self, ContentRecord, Direction, FamilyKey};
use crate::rewards::progress::{GameStats, PlayerProgress};
use crate::rewards::ratelimit::{
    self, RateAction, RateDecision, RateLimitStatus, RateLimitViolation,
};
use crate::store::Repository;

// =============================================================================
// COMMAND TRAIT
// =============================================================================

/// Per-transaction inputs shared by every command.
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    /// Instant the transaction runs at.
    pub now: DateTime<Utc>,
    /// Engine configuration.
    pub config: &'a EngineConfig,
}

impl<'a> Context<'a> {
    /// Daily gate in the configured offset.
    pub fn gate(&self) -> DailyEligibilityGate {
        DailyEligibilityGate::new(self.config.day_boundary)
    }

    /// Ledger over the configured level table.
    pub fn ledger(&self) -> ProgressionLedger<'a> {
        ProgressionLedger::new(&self.config.level_table, self.config.coin_ceiling_per_operation)
    }
}

/// One atomic unit of work.
pub trait Command {
    /// Value produced on success.
    type Output;

    /// Run against the transaction's repository view.
    fn execute(self, repo: &mut dyn Repository, ctx: &Context<'_>) -> EngineResult<Self::Output>;
}

fn load_player(repo: &dyn Repository, player: &PlayerId) -> EngineResult<PlayerProgress> {
    repo.player(player).ok_or_else(|| EngineError::not_found("player", player))
}

// =============================================================================
// PLAYER LIFECYCLE
// =============================================================================

/// Read model of a player's progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Owner.
    pub player_id: PlayerId,
    /// Cumulative XP.
    pub xp: u64,
    /// Currency balance.
    pub currency: u64,
    /// Current level.
    pub level: u32,
    /// XP needed for the next level, `None` at the top.
    pub next_level_xp: Option<u64>,
    /// Unlocked artifacts.
    pub unlocked_artifacts: Vec<ArtifactId>,
    /// Lifetime counters per mode.
    pub stats: BTreeMap<GameMode, GameStats>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
}

impl ProgressSummary {
    fn build(progress: &PlayerProgress, ctx: &Context<'_>) -> Self {
        let table = &ctx.config.level_table;
        Self {
            player_id: progress.player_id,
            xp: progress.xp,
            currency: progress.currency,
            level: table.level_for(progress.xp),
            next_level_xp: table.next_threshold(progress.xp),
            unlocked_artifacts: progress.unlocked.iter().cloned().collect(),
            stats: progress.stats.clone(),
            updated_at: progress.updated_at,
        }
    }
}

/// Create a zeroed progress record. Registering twice is a no-op.
#[derive(Clone, Debug)]
pub struct RegisterPlayer {
    /// Player to create.
    pub player: PlayerId,
}

/// Registration result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Whether a new record was created.
    pub created: bool,
    /// Current progress.
    pub progress: ProgressSummary,
}

impl Command for RegisterPlayer {
    type Output = Registration;

    fn execute(self, repo: &mut dyn Repository, ctx: &Context<'_>) -> EngineResult<Registration> {
        if let Some(existing) = repo.player(&self.player) {
            return Ok(Registration {
                created: false,
                progress: ProgressSummary::build(&existing, ctx),
            });
        }

        let progress = PlayerProgress::new(self.player, ctx.now);
        let summary = ProgressSummary::build(&progress, ctx);
        repo.put_player(progress);
        info!("Registered player {}", self.player.short());

        Ok(Registration { created: true, progress: summary })
    }
}

/// Read a player's progress.
#[derive(Clone, Debug)]
pub struct GetProgress {
    /// Player to read.
    pub player: PlayerId,
}

impl Command for GetProgress {
    type Output = ProgressSummary;

    fn execute(self, repo: &mut dyn Repository, ctx: &Context<'_>) -> EngineResult<ProgressSummary> {
        let progress = load_player(repo, &self.player)?;
        Ok(ProgressSummary::build(&progress, ctx))
    }
}

/// Zero every counter of a player's record in place.
#[derive(Clone, Debug)]
pub struct ResetPlayer {
    /// Player to reset.
    pub player: PlayerId,
}

impl Command for ResetPlayer {
    type Output = ProgressSummary;

    fn execute(self, repo: &mut dyn Repository, ctx: &Context<'_>) -> EngineResult<ProgressSummary> {
        let mut progress = load_player(repo, &self.player)?;
        progress.reset(ctx.now);
        let summary = ProgressSummary::build(&progress, ctx);
        repo.put_player(progress);

        info!("Admin reset player {}", self.player.short());
        Ok(summary)
    }
}

// =============================================================================
// DAILY GAMES
// =============================================================================

/// Whether the player may start `mode` now.
#[derive(Clone, Debug)]
pub struct CheckEligibility {
    /// Player asking.
    pub player: PlayerId,
    /// Mode to check.
    pub mode: GameMode,
}

impl Command for CheckEligibility {
    type Output = Eligibility;

    fn execute(self, repo: &mut dyn Repository, ctx: &Context<'_>) -> EngineResult<Eligibility> {
        let progress = load_player(repo, &self.player)?;
        Ok(ctx.gate().check(&progress, self.mode, ctx.now))
    }
}

/// Record one finished single-shot game.
#[derive(Clone, Debug)]
pub struct RecordGameResult {
    /// Player reporting.
    pub player: PlayerId,
    /// Mode played.
    pub mode: GameMode,
    /// Raw result.
    pub result: GameResult,
}

/// What a recorded game earned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// Mode played.
    pub mode: GameMode,
    /// XP added.
    pub xp_awarded: u64,
    /// Currency added.
    pub currency_awarded: u64,
    /// XP total afterwards.
    pub new_xp: u64,
    /// Currency balance afterwards.
    pub new_currency: u64,
    /// Level afterwards.
    pub level: u32,
    /// Artifacts unlocked by this game.
    pub newly_unlocked: Vec<ArtifactId>,
    /// Every artifact the player now holds.
    pub unlocked_artifacts: Vec<ArtifactId>,
    /// Attempts used today, including this one.
    pub attempts_today: u32,
}

impl Command for RecordGameResult {
    type Output = GameOutcome;

    fn execute(self, repo: &mut dyn Repository, ctx: &Context<'_>) -> EngineResult<GameOutcome> {
        let expected = self.mode.reward_kind();
        if expected == RewardKind::Batch {
            return Err(EngineError::invalid(format!(
                "{} progress is synced in batches",
                self.mode
            )));
        }
        if self.result.kind() != expected {
            return Err(EngineError::invalid(format!(
                "result kind {:?} does not match mode {}",
                self.result.kind(),
                self.mode
            )));
        }
        calculator::validate(&self.result)?;

        let mut progress = load_player(repo, &self.player)?;
        let gate = ctx.gate();
        gate.ensure_available(&progress, self.mode, ctx.now)?;

        let reward = calculator::compute(&self.result);
        let ledger = ctx.ledger().apply_earning(&mut progress, reward, ctx.now);

        let today = ctx.config.day_boundary.day_key(ctx.now);
        let (correct, incorrect) = self.result.answer_counts();
        let stats = progress.stats_mut(self.mode);
        stats.games_played += 1;
        if self.result.is_win() {
            stats.games_won += 1;
        }
        stats.correct_answers += u64::from(correct);
        stats.incorrect_answers += u64::from(incorrect);
        stats.touch_streak(today);

        let attempts_today = gate.record_play(&mut progress, self.mode, ctx.now);
        let unlocked_artifacts = progress.unlocked.iter().cloned().collect();
        repo.put_player(progress);

        info!(
            "Player {} finished {}: +{} XP, +{} coins (attempt {})",
            self.player.short(),
            self.mode,
            ledger.xp_awarded,
            ledger.currency_awarded,
            attempts_today
        );

        Ok(GameOutcome {
            mode: self.mode,
            xp_awarded: ledger.xp_awarded,
            currency_awarded: ledger.currency_awarded,
            new_xp: ledger.new_xp,
            new_currency: ledger.new_currency,
            level: ledger.level,
            newly_unlocked: ledger.newly_unlocked,
            unlocked_artifacts,
            attempts_today,
        })
    }
}

// =============================================================================
// BATCH SYNC
// =============================================================================

/// Sync a batch of answered questions from one question family.
///
/// Re-entrant: answers already on record contribute nothing, so a
/// replayed or overlapping batch earns only for what is new.
#[derive(Clone, Debug)]
pub struct SyncBatchProgress {
    /// Player syncing.
    pub player: PlayerId,
    /// Batch mode.
    pub mode: GameMode,
    /// Question family the attempts belong to.
    pub family: FamilyKey,
    /// Answers in this batch.
    pub attempts: Vec<Attempt>,
    /// Reward the client believes it earned.
    pub claimed: Reward,
    /// Client reports the pack as finished.
    pub is_complete: bool,
}

/// Result of a batch sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Reward actually credited.
    pub accepted_reward: Reward,
    /// Whether the claim was reduced.
    pub clamped: bool,
    /// Unique questions answered in the family so far.
    pub total_progress: u32,
    /// Questions in the family.
    pub family_size: u32,
    /// Whether the pack is recorded as completed.
    pub is_complete: bool,
    /// XP total afterwards.
    pub new_xp: u64,
    /// Currency balance afterwards.
    pub new_currency: u64,
    /// Level afterwards.
    pub level: u32,
    /// Artifacts unlocked by this sync.
    pub newly_unlocked: Vec<ArtifactId>,
}

impl Command for SyncBatchProgress {
    type Output = BatchOutcome;

    fn execute(self, repo: &mut dyn Repository, ctx: &Context<'_>) -> EngineResult<BatchOutcome> {
        if self.mode.reward_kind() != RewardKind::Batch {
            return Err(EngineError::invalid(format!(
                "{} does not accept batch progress",
                self.mode
            )));
        }
        if !matches!(self.family, FamilyKey::Questions { .. }) {
            return Err(EngineError::invalid(format!(
                "batch family must be a question family, got {}",
                self.family
            )));
        }

        let mut progress = load_player(repo, &self.player)?;

        let members: BTreeSet<RecordId> = repo.siblings(&self.family).into_iter().map(|r| r.id).collect();
        if members.is_empty() {
            return Err(EngineError::not_found("family", &self.family));
        }
        if let Some(stray) = self.attempts.iter().find(|a| !members.contains(&a.id)) {
            return Err(EngineError::invalid(format!(
                "question {} is not in {}",
                stray.id, self.family
            )));
        }

        let gate = ctx.gate();
        gate.ensure_available(&progress, self.mode, ctx.now)?;

        let mut batch = progress.batches.get(&self.family).cloned().unwrap_or_default();

        // First answer per question wins, within the batch and across syncs
        let mut fresh: Vec<Attempt> = Vec::new();
        for attempt in self.attempts {
            if !batch.answered.contains_key(&attempt.id) && !fresh.iter().any(|a| a.id == attempt.id) {
                fresh.push(attempt);
            }
        }

        let clamp = anticheat::clamp(self.claimed, &fresh, &LEARNING_PATH_RATES);
        if clamp.clamped {
            warn!(
                "Clamped batch claim from player {}: claimed {:?}, max {:?}",
                self.player.short(),
                self.claimed,
                clamp.max_possible
            );
        }

        for attempt in &fresh {
            batch.answered.insert(attempt.id.clone(), attempt.correct);
        }

        let pack_done = self.is_complete && members.iter().all(|id| batch.answered.contains_key(id));
        let newly_completed = pack_done && !batch.completed;
        if newly_completed {
            batch.completed = true;
        }

        let correct = fresh.iter().filter(|a| a.correct).count() as u64;
        let incorrect = fresh.len() as u64 - correct;
        let today = ctx.config.day_boundary.day_key(ctx.now);
        let stats = progress.stats_mut(self.mode);
        stats.correct_answers += correct;
        stats.incorrect_answers += incorrect;
        if !fresh.is_empty() {
            stats.games_played += 1;
            stats.touch_streak(today);
        }
        if newly_completed {
            stats.completions += 1;
            stats.games_won += 1;
        }

        let total_progress = batch.total();
        let is_complete = batch.completed;
        progress.batches.insert(self.family.clone(), batch);

        let ledger = ctx.ledger().apply_earning(&mut progress, clamp.validated, ctx.now);
        gate.record_play(&mut progress, self.mode, ctx.now);
        repo.put_player(progress);

        if newly_completed {
            info!("Player {} completed {}", self.player.short(), self.family);
        }

        Ok(BatchOutcome {
            accepted_reward: Reward::new(ledger.xp_awarded, ledger.currency_awarded),
            clamped: clamp.clamped,
            total_progress,
            family_size: members.len() as u32,
            is_complete,
            new_xp: ledger.new_xp,
            new_currency: ledger.new_currency,
            level: ledger.level,
            newly_unlocked: ledger.newly_unlocked,
        })
    }
}

// =============================================================================
// CONTENT
// =============================================================================

/// Insert or replace a content record.
///
/// `order == 0` appends the record after its current siblings.
#[derive(Clone, Debug)]
pub struct UpsertContent {
    /// Record to store.
    pub record: ContentRecord,
}

impl Command for UpsertContent {
    type Output = ContentRecord;

    fn execute(self, repo: &mut dyn Repository, _ctx: &Context<'_>) -> EngineResult<ContentRecord> {
        let mut record = self.record;
        if record.id.as_str().is_empty() {
            return Err(EngineError::invalid("content id must not be empty"));
        }
        if record.order == 0 {
            let last = repo
                .siblings(&record.family)
                .iter()
                .filter(|r| r.id != record.id)
                .map(|r| r.order)
                .max()
                .unwrap_or(0);
            record.order = last
                .checked_add(1)
                .ok_or_else(|| EngineError::invalid(format!("no order slot left after {last} in {}", record.family)))?;
        }
        repo.put_content(record.clone());
        Ok(record)
    }
}

/// Move one record within its family and renumber every sibling.
#[derive(Clone, Debug)]
pub struct ReorderFamily {
    /// Family to reorder.
    pub family: FamilyKey,
    /// Record to move.
    pub member: RecordId,
    /// Move direction.
    pub direction: Direction,
}

impl Command for ReorderFamily {
    type Output = Vec<ContentRecord>;

    fn execute(self, repo: &mut dyn Repository, _ctx: &Context<'_>) -> EngineResult<Vec<ContentRecord>> {
        let siblings = repo.siblings(&self.family);
        let ordered = ordering::reorder(&self.family, siblings, &self.member, self.direction)?;

        for record in &ordered {
            repo.put_content(record.clone());
        }

        info!(
            "Reordered {} in {} ({:?}), {} siblings renumbered",
            self.member,
            self.family,
            self.direction,
            ordered.len()
        );
        Ok(ordered)
    }
}

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Count one call against the caller's budget.
///
/// A rejection still has to persist its violation record, so the
/// rejection is carried in the output and the transaction commits.
#[derive(Clone, Debug)]
pub struct ConsumeRateLimit {
    /// Limited action.
    pub action: RateAction,
    /// Caller identity.
    pub identifier: String,
}

impl Command for ConsumeRateLimit {
    type Output = EngineResult<RateLimitStatus>;

    fn execute(
        self,
        repo: &mut dyn Repository,
        ctx: &Context<'_>,
    ) -> EngineResult<EngineResult<RateLimitStatus>> {
        let policy = ctx.config.policy(self.action);
        let existing = repo.counter(&self.identifier, self.action);

        match ratelimit::evaluate(existing.as_ref(), &self.identifier, self.action, &policy, ctx.now) {
            RateDecision::Allowed { counter, status } => {
                repo.put_counter(counter);
                Ok(Ok(status))
            }
            RateDecision::Rejected { observed, reset_at } => {
                let recent = repo.latest_violation(&self.identifier, self.action);
                let violation = ratelimit::coalesce_violation(
                    recent.as_ref(),
                    &self.identifier,
                    self.action,
                    policy.max,
                    observed,
                    ctx.now,
                    ctx.config.violation_coalesce,
                );
                warn!(
                    "Rate limit exceeded: {} on {} ({} > {}, {} occurrence(s))",
                    self.identifier, self.action, observed, policy.max, violation.occurrences
                );
                repo.put_violation(violation);

                let retry_after = (reset_at - ctx.now).to_std().unwrap_or_default();
                Ok(Err(EngineError::RateLimited {
                    action: self.action,
                    limit: policy.max,
                    retry_after,
                }))
            }
        }
    }
}

// =============================================================================
// VIOLATION ADMIN
// =============================================================================

/// Violations, most recent first.
#[derive(Clone, Debug)]
pub struct ListViolations {
    /// Only records not yet marked read.
    pub unread_only: bool,
}

impl Command for ListViolations {
    type Output = Vec<RateLimitViolation>;

    fn execute(self, repo: &mut dyn Repository, _ctx: &Context<'_>) -> EngineResult<Vec<RateLimitViolation>> {
        let mut violations: Vec<_> = repo
            .violations()
            .into_iter()
            .filter(|v| !self.unread_only || !v.read)
            .collect();
        violations.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.id.cmp(&b.id)));
        Ok(violations)
    }
}

/// Mark a violation as read.
#[derive(Clone, Debug)]
pub struct MarkViolationRead {
    /// Violation to mark.
    pub id: ViolationId,
}

impl Command for MarkViolationRead {
    type Output = RateLimitViolation;

    fn execute(self, repo: &mut dyn Repository, _ctx: &Context<'_>) -> EngineResult<RateLimitViolation> {
        let mut violation = repo
            .violation(&self.id)
            .ok_or_else(|| EngineError::not_found("violation", self.id))?;
        violation.read = true;
        repo.put_violation(violation.clone());
        Ok(violation)
    }
}

/// Rows removed by a sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired counters deleted.
    pub counters_removed: usize,
    /// Old violations deleted.
    pub violations_removed: usize,
}

/// Prune expired counters and violations past retention.
#[derive(Clone, Debug, Default)]
pub struct Sweep;

impl Command for Sweep {
    type Output = SweepReport;

    fn execute(self, repo: &mut dyn Repository, ctx: &Context<'_>) -> EngineResult<SweepReport> {
        let mut report = SweepReport::default();

        for counter in repo.counters() {
            if counter.is_expired(&ctx.config.policy(counter.action), ctx.now) {
                repo.remove_counter(&counter.identifier, counter.action);
                report.counters_removed += 1;
            }
        }

        for violation in repo.violations() {
            if ctx.now - violation.last_seen > ctx.config.violation_retention {
                repo.remove_violation(&violation.id);
                report.violations_removed += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Tables;

    fn ctx(config: &EngineConfig) -> Context<'_> {
        Context {
            now: DateTime::parse_from_rfc3339("2024-05-01T03:00:00Z").unwrap().with_timezone(&Utc),
            config,
        }
    }

    fn seeded(player: PlayerId, ctx: &Context<'_>) -> Tables {
        let mut tables = Tables::default();
        RegisterPlayer { player }.execute(&mut tables, ctx).unwrap();
        tables
    }

    #[test]
    fn test_register_is_idempotent() {
        let config = EngineConfig::default();
        let ctx = ctx(&config);
        let player = PlayerId::new([1; 16]);
        let mut tables = seeded(player, &ctx);

        let again = RegisterPlayer { player }.execute(&mut tables, &ctx).unwrap();
        assert!(!again.created);
        assert_eq!(again.progress.level, 1);
    }

    #[test]
    fn test_mode_and_kind_must_match() {
        let config = EngineConfig::default();
        let ctx = ctx(&config);
        let player = PlayerId::new([1; 16]);
        let mut tables = seeded(player, &ctx);

        let err = RecordGameResult {
            player,
            mode: GameMode::DailyWord,
            result: GameResult::CorrectCount { correct: 3, answered: 3 },
        }
        .execute(&mut tables, &ctx)
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let err = RecordGameResult {
            player,
            mode: GameMode::LearningPath,
            result: GameResult::CorrectCount { correct: 3, answered: 3 },
        }
        .execute(&mut tables, &ctx)
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_unknown_player_not_found() {
        let config = EngineConfig::default();
        let ctx = ctx(&config);
        let mut tables = Tables::default();
        let err = GetProgress { player: PlayerId::new([9; 16]) }
            .execute(&mut tables, &ctx)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "player", .. }));
    }

    #[test]
    fn test_upsert_appends_when_order_missing() {
        let config = EngineConfig::default();
        let ctx = ctx(&config);
        let mut tables = Tables::default();
        for id in ["a", "b"] {
            UpsertContent {
                record: ContentRecord { id: id.into(), family: FamilyKey::Levels, order: 0, created_at: ctx.now },
            }
            .execute(&mut tables, &ctx)
            .unwrap();
        }
        let mut orders: Vec<u32> = tables.siblings(&FamilyKey::Levels).iter().map(|r| r.order).collect();
        orders.sort_unstable();
        assert_eq!(orders, vec![1, 2]);
    }

    #[test]
    fn test_upsert_append_after_max_order_is_invalid() {
        let config = EngineConfig::default();
        let ctx = ctx(&config);
        let mut tables = Tables::default();
        UpsertContent {
            record: ContentRecord { id: "a".into(), family: FamilyKey::Levels, order: u32::MAX, created_at: ctx.now },
        }
        .execute(&mut tables, &ctx)
        .unwrap();

        let err = UpsertContent {
            record: ContentRecord { id: "b".into(), family: FamilyKey::Levels, order: 0, created_at: ctx.now },
        }
        .execute(&mut tables, &ctx)
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(tables.siblings(&FamilyKey::Levels).len(), 1);
    }

    #[test]
    fn test_sweep_prunes_expired_rows() {
        let config = EngineConfig::default();
        let ctx = ctx(&config);
        let mut tables = Tables::default();

        ConsumeRateLimit { action: RateAction::SubmitGame, identifier: "p".into() }
            .execute(&mut tables, &ctx)
            .unwrap()
            .unwrap();

        let later = Context { now: ctx.now + chrono::Duration::hours(200), config: &config };
        tables.put_violation(ratelimit::coalesce_violation(
            None,
            "p",
            RateAction::SubmitGame,
            10,
            11,
            ctx.now,
            config.violation_coalesce,
        ));

        let report = Sweep.execute(&mut tables, &later).unwrap();
        assert_eq!(report, SweepReport { counters_removed: 1, violations_removed: 1 });
        assert!(tables.counters().is_empty());
        assert!(tables.violations().is_empty());
    }
}
