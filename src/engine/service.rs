//! Progression Engine
//!
//! Async facade over the store. Each public method wraps one command in
//! one transaction stamped with the injected clock's current instant.

use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

use super::commands::*;
use crate::config::EngineConfig;
use crate::core::clock::{Clock, SystemClock};
use crate::core::ids::{PlayerId, RecordId, ViolationId};
use crate::error::{EngineError, EngineResult};
use crate::rewards::anticheat::Attempt;
use crate::rewards::calculator::Reward;
use crate::rewards::daily::Eligibility;
use crate::rewards::modes::{GameMode, GameResult};
use crate::rewards::ordering::{ContentRecord, Direction, FamilyKey};
use crate::rewards::ratelimit::{RateAction, RateLimitStatus, RateLimitViolation};
use crate::store::{Snapshot, Store, Tables};

/// Shared engine handle.
pub struct ProgressionEngine {
    store: Store,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ProgressionEngine {
    /// Engine over an empty store and the wall clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Engine over an empty store and a custom clock.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Store::new(),
            clock,
            config,
        }
    }

    /// Engine restored from a snapshot.
    pub fn from_snapshot(config: EngineConfig, clock: Arc<dyn Clock>, snapshot: Snapshot) -> Self {
        Self {
            store: Store::from_tables(Tables::from(snapshot)),
            clock,
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a command in its own transaction.
    pub async fn run<C: Command>(&self, command: C) -> EngineResult<C::Output> {
        let ctx = Context {
            now: self.clock.now(),
            config: &self.config,
        };
        self.store.transact(|repo| command.execute(repo, &ctx)).await
    }

    // =========================================================================
    // PLAYERS
    // =========================================================================

    /// Create a zeroed progress record if none exists.
    #[instrument(skip(self, player), fields(player = %player.short()))]
    pub async fn register_player(&self, player: PlayerId) -> EngineResult<Registration> {
        self.run(RegisterPlayer { player }).await
    }

    /// Current progress.
    pub async fn get_progress(&self, player: PlayerId) -> EngineResult<ProgressSummary> {
        self.run(GetProgress { player }).await
    }

    /// Zero a player's record (admin).
    #[instrument(skip(self, player), fields(player = %player.short()))]
    pub async fn admin_reset_player(&self, player: PlayerId) -> EngineResult<ProgressSummary> {
        self.run(ResetPlayer { player }).await
    }

    // =========================================================================
    // GAMES
    // =========================================================================

    /// Whether `player` may start `mode` today.
    pub async fn check_eligibility(&self, player: PlayerId, mode: GameMode) -> EngineResult<Eligibility> {
        self.run(CheckEligibility { player, mode }).await
    }

    /// Record a finished single-shot game and credit its reward.
    #[instrument(skip(self, player, mode, result), fields(player = %player.short(), mode = %mode))]
    pub async fn record_game_result(
        &self,
        player: PlayerId,
        mode: GameMode,
        result: GameResult,
    ) -> EngineResult<GameOutcome> {
        self.run(RecordGameResult { player, mode, result }).await
    }

    /// Sync a batch of answers, crediting at most what they prove.
    #[instrument(skip(self, player, family, attempts), fields(player = %player.short(), family = %family, n = attempts.len()))]
    pub async fn sync_batch_progress(
        &self,
        player: PlayerId,
        mode: GameMode,
        family: FamilyKey,
        attempts: Vec<Attempt>,
        claimed: Reward,
        is_complete: bool,
    ) -> EngineResult<BatchOutcome> {
        self.run(SyncBatchProgress {
            player,
            mode,
            family,
            attempts,
            claimed,
            is_complete,
        })
        .await
    }

    // =========================================================================
    // CONTENT
    // =========================================================================

    /// Register or update a content record.
    pub async fn upsert_content(&self, record: ContentRecord) -> EngineResult<ContentRecord> {
        self.run(UpsertContent { record }).await
    }

    /// Move a record within its family (admin).
    #[instrument(skip(self))]
    pub async fn reorder_family(
        &self,
        family: FamilyKey,
        member: RecordId,
        direction: Direction,
    ) -> EngineResult<Vec<ContentRecord>> {
        self.run(ReorderFamily { family, member, direction }).await
    }

    // =========================================================================
    // RATE LIMITING
    // =========================================================================

    /// Count one call by `identifier` against `action`'s budget.
    ///
    /// Over budget fails with `RateLimited`; the violation is still recorded.
    pub async fn check_and_consume_rate_limit(
        &self,
        action: RateAction,
        identifier: &str,
    ) -> EngineResult<RateLimitStatus> {
        self.run(ConsumeRateLimit {
            action,
            identifier: identifier.to_string(),
        })
        .await?
    }

    /// Violations, newest first (admin).
    pub async fn list_violations(&self, unread_only: bool) -> EngineResult<Vec<RateLimitViolation>> {
        self.run(ListViolations { unread_only }).await
    }

    /// Mark a violation read (admin).
    pub async fn mark_violation_read(&self, id: ViolationId) -> EngineResult<RateLimitViolation> {
        self.run(MarkViolationRead { id }).await
    }

    /// Prune expired counters and old violations.
    pub async fn sweep(&self) -> EngineResult<SweepReport> {
        self.run(Sweep).await
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Copy of all committed state.
    pub async fn snapshot(&self) -> Snapshot {
        self.store.snapshot().await
    }

    /// Write a snapshot to `path` on the blocking pool.
    pub async fn save_snapshot(&self, path: &Path) -> EngineResult<()> {
        let snapshot = self.snapshot().await;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || snapshot.save(&path))
            .await
            .map_err(|e| EngineError::Storage(format!("snapshot writer stopped: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::ids::ArtifactId;
    use crate::rewards::ledger::{LevelTable, LevelThreshold};
    use crate::rewards::modes::Difficulty;
    use chrono::{DateTime, Duration, Utc};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn engine_at(start: &str) -> (ProgressionEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(at(start)));
        let config = EngineConfig {
            day_boundary: crate::core::clock::DayBoundary::utc(),
            ..EngineConfig::default()
        };
        (ProgressionEngine::with_clock(config, clock.clone()), clock)
    }

    fn player(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    fn questions() -> FamilyKey {
        FamilyKey::Questions {
            level: "lvl-1".into(),
            difficulty: "easy".into(),
        }
    }

    async fn seed_questions(engine: &ProgressionEngine, ids: &[&str]) {
        for id in ids {
            engine
                .upsert_content(ContentRecord {
                    id: (*id).into(),
                    family: questions(),
                    order: 0,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_daily_word_once_per_day() {
        let (engine, clock) = engine_at("2024-03-10T08:00:00Z");
        let p = player(1);
        engine.register_player(p).await.unwrap();

        let won = GameResult::Guess { won: true, guesses: 2, hint_used: false };
        let out = engine.record_game_result(p, GameMode::DailyWord, won.clone()).await.unwrap();
        assert_eq!(out.xp_awarded, 20);
        assert_eq!(out.currency_awarded, 8);
        assert_eq!(out.attempts_today, 1);

        let err = engine.record_game_result(p, GameMode::DailyWord, won.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyCompletedToday { .. }));
        assert!(!engine.check_eligibility(p, GameMode::DailyWord).await.unwrap().allowed);

        // The failed attempt left nothing behind
        assert_eq!(engine.get_progress(p).await.unwrap().xp, 20);

        clock.set(at("2024-03-11T00:00:00Z"));
        assert!(engine.check_eligibility(p, GameMode::DailyWord).await.unwrap().allowed);
        engine.record_game_result(p, GameMode::DailyWord, won).await.unwrap();

        let summary = engine.get_progress(p).await.unwrap();
        let stats = &summary.stats[&GameMode::DailyWord];
        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.current_streak, 2);
    }

    #[tokio::test]
    async fn test_timed_search_cap_scenario() {
        let (engine, _) = engine_at("2024-03-10T08:00:00Z");
        let p = player(2);
        engine.register_player(p).await.unwrap();

        let result = GameResult::TimedSearch {
            difficulty: Difficulty::Easy,
            items_found: 5,
            time_remaining_secs: 300,
        };
        let out = engine.record_game_result(p, GameMode::WordSearch, result).await.unwrap();
        assert_eq!(out.xp_awarded, 50);
        assert_eq!(out.currency_awarded, 10);
    }

    #[tokio::test]
    async fn test_out_of_range_input_rejected() {
        let (engine, _) = engine_at("2024-03-10T08:00:00Z");
        let p = player(3);
        engine.register_player(p).await.unwrap();

        let err = engine
            .record_game_result(p, GameMode::MathSprint, GameResult::CorrectCount { correct: 9, answered: 4 })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        // Rejected input does not consume the daily attempt
        let e = engine.check_eligibility(p, GameMode::MathSprint).await.unwrap();
        assert_eq!(e.attempts_today, 0);
    }

    #[tokio::test]
    async fn test_threshold_crossing_unlocks_artifact() {
        let clock = Arc::new(ManualClock::new(at("2024-03-10T08:00:00Z")));
        let config = EngineConfig {
            level_table: LevelTable::new(vec![
                LevelThreshold { level: 1, xp_required: 0, artifact: None },
                LevelThreshold { level: 2, xp_required: 100, artifact: Some(ArtifactId::new("X")) },
            ]),
            ..EngineConfig::default()
        };
        let engine = ProgressionEngine::with_clock(config, clock);
        let p = player(4);
        engine.register_player(p).await.unwrap();

        // 18 correct sprint answers: 90 XP
        let sprint = GameResult::CorrectCount { correct: 18, answered: 18 };
        let out = engine.record_game_result(p, GameMode::MathSprint, sprint).await.unwrap();
        assert_eq!(out.new_xp, 90);
        assert!(out.newly_unlocked.is_empty());

        // Third-guess win without a hint: +15 XP crosses 100
        let win = GameResult::Guess { won: true, guesses: 3, hint_used: false };
        let out = engine.record_game_result(p, GameMode::DailyWord, win).await.unwrap();
        assert_eq!(out.xp_awarded, 15);
        assert_eq!(out.new_xp, 105);
        assert_eq!(out.newly_unlocked, vec![ArtifactId::new("X")]);
        assert!(out.unlocked_artifacts.contains(&ArtifactId::new("X")));

        let summary = engine.get_progress(p).await.unwrap();
        assert_eq!(summary.xp, 105);
        assert_eq!(summary.unlocked_artifacts, vec![ArtifactId::new("X")]);
    }

    #[tokio::test]
    async fn test_batch_resync_is_idempotent() {
        let (engine, _) = engine_at("2024-03-10T08:00:00Z");
        let p = player(5);
        engine.register_player(p).await.unwrap();
        seed_questions(&engine, &["q1", "q2", "q3"]).await;

        let attempts = vec![Attempt::new("q1", true), Attempt::new("q2", false)];
        let first = engine
            .sync_batch_progress(p, GameMode::LearningPath, questions(), attempts.clone(), Reward::new(12, 2), false)
            .await
            .unwrap();
        assert_eq!(first.accepted_reward, Reward::new(12, 2));
        assert_eq!(first.total_progress, 2);
        assert!(!first.is_complete);

        let replay = engine
            .sync_batch_progress(p, GameMode::LearningPath, questions(), attempts, Reward::new(12, 2), false)
            .await
            .unwrap();
        assert_eq!(replay.accepted_reward, Reward::ZERO);
        assert!(replay.clamped);
        assert_eq!(replay.new_xp, 12);
        assert_eq!(replay.total_progress, 2);
    }

    #[tokio::test]
    async fn test_batch_completion_counted_once() {
        let (engine, _) = engine_at("2024-03-10T08:00:00Z");
        let p = player(6);
        engine.register_player(p).await.unwrap();
        seed_questions(&engine, &["q1", "q2"]).await;

        // Claiming completion before every question is answered does not count
        let partial = engine
            .sync_batch_progress(p, GameMode::LearningPath, questions(), vec![Attempt::new("q1", true)], Reward::ZERO, true)
            .await
            .unwrap();
        assert!(!partial.is_complete);

        let done = engine
            .sync_batch_progress(p, GameMode::LearningPath, questions(), vec![Attempt::new("q2", true)], Reward::ZERO, true)
            .await
            .unwrap();
        assert!(done.is_complete);

        // Replaying the completing batch, out of order, changes nothing
        for _ in 0..3 {
            let again = engine
                .sync_batch_progress(
                    p,
                    GameMode::LearningPath,
                    questions(),
                    vec![Attempt::new("q2", true), Attempt::new("q1", true)],
                    Reward::new(20, 4),
                    true,
                )
                .await
                .unwrap();
            assert!(again.is_complete);
            assert_eq!(again.accepted_reward, Reward::ZERO);
        }

        let summary = engine.get_progress(p).await.unwrap();
        assert_eq!(summary.stats[&GameMode::LearningPath].completions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completing_batches_count_once() {
        let (engine, _) = engine_at("2024-03-10T08:00:00Z");
        let engine = Arc::new(engine);
        let p = player(11);
        engine.register_player(p).await.unwrap();
        seed_questions(&engine, &["q1", "q2"]).await;

        engine
            .sync_batch_progress(p, GameMode::LearningPath, questions(), vec![Attempt::new("q1", true)], Reward::ZERO, false)
            .await
            .unwrap();
        let xp_before = engine.get_progress(p).await.unwrap().xp;

        let submissions: Vec<_> = (0..16)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .sync_batch_progress(
                            p,
                            GameMode::LearningPath,
                            questions(),
                            vec![Attempt::new("q2", true)],
                            Reward::new(10, 2),
                            true,
                        )
                        .await
                })
            })
            .collect();

        let mut credited = Vec::new();
        for handle in submissions {
            let out = handle.await.unwrap().unwrap();
            assert!(out.is_complete);
            if out.accepted_reward != Reward::ZERO {
                credited.push(out.accepted_reward);
            }
        }
        assert_eq!(credited, vec![Reward::new(10, 2)]);

        let summary = engine.get_progress(p).await.unwrap();
        assert_eq!(summary.stats[&GameMode::LearningPath].completions, 1);
        assert_eq!(summary.xp, xp_before + 10);
    }

    #[tokio::test]
    async fn test_batch_clamps_inflated_claim() {
        let (engine, _) = engine_at("2024-03-10T08:00:00Z");
        let p = player(7);
        engine.register_player(p).await.unwrap();
        seed_questions(&engine, &["q1"]).await;

        let out = engine
            .sync_batch_progress(p, GameMode::LearningPath, questions(), vec![Attempt::new("q1", true)], Reward::new(9999, 9999), false)
            .await
            .unwrap();
        assert_eq!(out.accepted_reward, Reward::new(10, 2));
        assert!(out.clamped);
    }

    #[tokio::test]
    async fn test_batch_rejects_foreign_question() {
        let (engine, _) = engine_at("2024-03-10T08:00:00Z");
        let p = player(8);
        engine.register_player(p).await.unwrap();
        seed_questions(&engine, &["q1"]).await;

        let err = engine
            .sync_batch_progress(p, GameMode::LearningPath, questions(), vec![Attempt::new("elsewhere", true)], Reward::ZERO, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_boundary_and_violation() {
        let (engine, clock) = engine_at("2024-03-10T08:00:00Z");
        let limit = RateAction::SubmitGame.policy().max;

        for i in 0..limit {
            let status = engine.check_and_consume_rate_limit(RateAction::SubmitGame, "kid-1").await.unwrap();
            assert_eq!(status.remaining, limit - i - 1);
        }

        let err = engine
            .check_and_consume_rate_limit(RateAction::SubmitGame, "kid-1")
            .await
            .unwrap_err();
        match err {
            EngineError::RateLimited { action, limit: l, retry_after } => {
                assert_eq!(action, RateAction::SubmitGame);
                assert_eq!(l, limit);
                assert_eq!(retry_after, std::time::Duration::from_secs(60));
            }
            other => panic!("unexpected {other:?}"),
        }

        // Second rejection coalesces into the same record
        let _ = engine.check_and_consume_rate_limit(RateAction::SubmitGame, "kid-1").await;
        let violations = engine.list_violations(true).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].occurrences, 2);

        engine.mark_violation_read(violations[0].id).await.unwrap();
        assert!(engine.list_violations(true).await.unwrap().is_empty());

        // Other identifiers have their own budget
        assert!(engine.check_and_consume_rate_limit(RateAction::SubmitGame, "kid-2").await.is_ok());

        clock.advance(Duration::milliseconds(60_001));
        let status = engine.check_and_consume_rate_limit(RateAction::SubmitGame, "kid-1").await.unwrap();
        assert_eq!(status.remaining, limit - 1);
    }

    #[tokio::test]
    async fn test_reorder_and_reset() {
        let (engine, _) = engine_at("2024-03-10T08:00:00Z");
        for id in ["a", "b", "c"] {
            engine
                .upsert_content(ContentRecord { id: id.into(), family: FamilyKey::Levels, order: 0, created_at: Utc::now() })
                .await
                .unwrap();
        }
        let out = engine.reorder_family(FamilyKey::Levels, "c".into(), Direction::Up).await.unwrap();
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);

        let err = engine
            .reorder_family(FamilyKey::Difficulties { level: "a".into() }, "x".into(), Direction::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "family", .. }));

        let p = player(9);
        engine.register_player(p).await.unwrap();
        engine
            .record_game_result(p, GameMode::MathSprint, GameResult::CorrectCount { correct: 40, answered: 40 })
            .await
            .unwrap();
        let reset = engine.admin_reset_player(p).await.unwrap();
        assert_eq!(reset.xp, 0);
        assert!(reset.unlocked_artifacts.is_empty());
        assert_eq!(engine.check_eligibility(p, GameMode::MathSprint).await.unwrap().attempts_today, 0);
    }

    #[tokio::test]
    async fn test_snapshot_restores_state() {
        let (engine, clock) = engine_at("2024-03-10T08:00:00Z");
        let p = player(10);
        engine.register_player(p).await.unwrap();
        engine
            .record_game_result(p, GameMode::DailyWord, GameResult::Guess { won: false, guesses: 6, hint_used: false })
            .await
            .unwrap();

        let restored = ProgressionEngine::from_snapshot(engine.config().clone(), clock, engine.snapshot().await);
        assert_eq!(restored.get_progress(p).await.unwrap().xp, 3);
        assert!(!restored.check_eligibility(p, GameMode::DailyWord).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_save_snapshot_round_trips_through_disk() {
        let (engine, clock) = engine_at("2024-03-10T08:00:00Z");
        let p = player(12);
        engine.register_player(p).await.unwrap();
        engine
            .record_game_result(p, GameMode::DailyWord, GameResult::Guess { won: true, guesses: 1, hint_used: false })
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        engine.save_snapshot(&path).await.unwrap();

        let snapshot = Snapshot::load(&path).unwrap().unwrap();
        let restored = ProgressionEngine::from_snapshot(engine.config().clone(), clock, snapshot);
        assert_eq!(restored.get_progress(p).await.unwrap().xp, 30);
    }
}
