//! Transactional Store
//!
//! In-memory tables behind a single async mutex: one writer at a time, so
//! each transaction sees a consistent snapshot and conflicting writes are
//! serialized. A [`Transaction`] stages every write and only applies them
//! to the tables when the closure returns `Ok`, so a failed operation
//! leaves no trace.

pub mod snapshot;

use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::ids::{PlayerId, RecordId, ViolationId};
use crate::error::EngineResult;
use crate::rewards::ordering::{ContentRecord, FamilyKey};
use crate::rewards::progress::PlayerProgress;
use crate::rewards::ratelimit::{RateAction, RateLimitCounter, RateLimitViolation};

pub use snapshot::Snapshot;

/// Typed access to persisted state. Reads return owned copies.
pub trait Repository {
    /// Progress record for a player.
    fn player(&self, id: &PlayerId) -> Option<PlayerProgress>;
    /// Insert or replace a progress record.
    fn put_player(&mut self, progress: PlayerProgress);

    /// Counter for (identifier, action).
    fn counter(&self, identifier: &str, action: RateAction) -> Option<RateLimitCounter>;
    /// Insert or replace a counter.
    fn put_counter(&mut self, counter: RateLimitCounter);
    /// Delete a counter.
    fn remove_counter(&mut self, identifier: &str, action: RateAction);
    /// All counters.
    fn counters(&self) -> Vec<RateLimitCounter>;

    /// Violation by id.
    fn violation(&self, id: &ViolationId) -> Option<RateLimitViolation>;
    /// Most recently updated violation for (identifier, action).
    fn latest_violation(&self, identifier: &str, action: RateAction) -> Option<RateLimitViolation> {
        self.violations()
            .into_iter()
            .filter(|v| v.identifier == identifier && v.action == action)
            .max_by_key(|v| v.last_seen)
    }
    /// Insert or replace a violation.
    fn put_violation(&mut self, violation: RateLimitViolation);
    /// Delete a violation.
    fn remove_violation(&mut self, id: &ViolationId);
    /// All violations.
    fn violations(&self) -> Vec<RateLimitViolation>;

    /// Content record by id.
    fn content(&self, id: &RecordId) -> Option<ContentRecord>;
    /// Every record in a family, unsorted.
    fn siblings(&self, family: &FamilyKey) -> Vec<ContentRecord>;
    /// Insert or replace a content record.
    fn put_content(&mut self, record: ContentRecord);
}

type CounterKey = (String, RateAction);

/// Committed state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tables {
    players: BTreeMap<PlayerId, PlayerProgress>,
    counters: BTreeMap<CounterKey, RateLimitCounter>,
    violations: BTreeMap<ViolationId, RateLimitViolation>,
    content: BTreeMap<RecordId, ContentRecord>,
}

impl Tables {
    /// Number of player records.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

impl Repository for Tables {
    fn player(&self, id: &PlayerId) -> Option<PlayerProgress> {
        self.players.get(id).cloned()
    }

    fn put_player(&mut self, progress: PlayerProgress) {
        self.players.insert(progress.player_id, progress);
    }

    fn counter(&self, identifier: &str, action: RateAction) -> Option<RateLimitCounter> {
        self.counters.get(&(identifier.to_string(), action)).cloned()
    }

    fn put_counter(&mut self, counter: RateLimitCounter) {
        self.counters.insert((counter.identifier.clone(), counter.action), counter);
    }

    fn remove_counter(&mut self, identifier: &str, action: RateAction) {
        self.counters.remove(&(identifier.to_string(), action));
    }

    fn counters(&self) -> Vec<RateLimitCounter> {
        self.counters.values().cloned().collect()
    }

    fn violation(&self, id: &ViolationId) -> Option<RateLimitViolation> {
        self.violations.get(id).cloned()
    }

    fn put_violation(&mut self, violation: RateLimitViolation) {
        self.violations.insert(violation.id, violation);
    }

    fn remove_violation(&mut self, id: &ViolationId) {
        self.violations.remove(id);
    }

    fn violations(&self) -> Vec<RateLimitViolation> {
        self.violations.values().cloned().collect()
    }

    fn content(&self, id: &RecordId) -> Option<ContentRecord> {
        self.content.get(id).cloned()
    }

    fn siblings(&self, family: &FamilyKey) -> Vec<ContentRecord> {
        self.content.values().filter(|r| &r.family == family).cloned().collect()
    }

    fn put_content(&mut self, record: ContentRecord) {
        self.content.insert(record.id.clone(), record);
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// Staged writes over one table. `None` marks a delete.
#[derive(Debug)]
struct Layer<K, V> {
    writes: BTreeMap<K, Option<V>>,
}

impl<K: Ord + Clone, V: Clone> Layer<K, V> {
    fn new() -> Self {
        Self { writes: BTreeMap::new() }
    }

    fn get(&self, base: &BTreeMap<K, V>, key: &K) -> Option<V> {
        match self.writes.get(key) {
            Some(staged) => staged.clone(),
            None => base.get(key).cloned(),
        }
    }

    fn put(&mut self, key: K, value: V) {
        self.writes.insert(key, Some(value));
    }

    fn remove(&mut self, key: K) {
        self.writes.insert(key, None);
    }

    fn values(&self, base: &BTreeMap<K, V>) -> Vec<V> {
        let mut merged: BTreeMap<&K, &V> = base.iter().collect();
        for (key, staged) in &self.writes {
            match staged {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_values().cloned().collect()
    }

    fn apply(self, base: &mut BTreeMap<K, V>) -> usize {
        let n = self.writes.len();
        for (key, staged) in self.writes {
            match staged {
                Some(value) => {
                    base.insert(key, value);
                }
                None => {
                    base.remove(&key);
                }
            }
        }
        n
    }
}

/// A unit of work over committed tables. Writes are invisible to other
/// transactions until [`Transaction::commit`].
pub struct Transaction<'a> {
    base: &'a Tables,
    players: Layer<PlayerId, PlayerProgress>,
    counters: Layer<CounterKey, RateLimitCounter>,
    violations: Layer<ViolationId, RateLimitViolation>,
    content: Layer<RecordId, ContentRecord>,
}

/// Staged writes detached from the tables they were read from.
pub struct WriteSet {
    players: Layer<PlayerId, PlayerProgress>,
    counters: Layer<CounterKey, RateLimitCounter>,
    violations: Layer<ViolationId, RateLimitViolation>,
    content: Layer<RecordId, ContentRecord>,
}

impl<'a> Transaction<'a> {
    /// Begin over `base`.
    pub fn begin(base: &'a Tables) -> Self {
        Self {
            base,
            players: Layer::new(),
            counters: Layer::new(),
            violations: Layer::new(),
            content: Layer::new(),
        }
    }

    /// Finish, releasing the borrow of the base tables.
    pub fn commit(self) -> WriteSet {
        WriteSet {
            players: self.players,
            counters: self.counters,
            violations: self.violations,
            content: self.content,
        }
    }
}

impl WriteSet {
    /// Apply to `tables`. Returns the number of rows written.
    pub fn apply(self, tables: &mut Tables) -> usize {
        self.players.apply(&mut tables.players)
            + self.counters.apply(&mut tables.counters)
            + self.violations.apply(&mut tables.violations)
            + self.content.apply(&mut tables.content)
    }
}

impl Repository for Transaction<'_> {
    fn player(&self, id: &PlayerId) -> Option<PlayerProgress> {
        self.players.get(&self.base.players, id)
    }

    fn put_player(&mut self, progress: PlayerProgress) {
        self.players.put(progress.player_id, progress);
    }

    fn counter(&self, identifier: &str, action: RateAction) -> Option<RateLimitCounter> {
        self.counters.get(&self.base.counters, &(identifier.to_string(), action))
    }

    fn put_counter(&mut self, counter: RateLimitCounter) {
        self.counters.put((counter.identifier.clone(), counter.action), counter);
    }

    fn remove_counter(&mut self, identifier: &str, action: RateAction) {
        self.counters.remove((identifier.to_string(), action));
    }

    fn counters(&self) -> Vec<RateLimitCounter> {
        self.counters.values(&self.base.counters)
    }

    fn violation(&self, id: &ViolationId) -> Option<RateLimitViolation> {
        self.violations.get(&self.base.violations, id)
    }

    fn put_violation(&mut self, violation: RateLimitViolation) {
        self.violations.put(violation.id, violation);
    }

    fn remove_violation(&mut self, id: &ViolationId) {
        self.violations.remove(*id);
    }

    fn violations(&self) -> Vec<RateLimitViolation> {
        self.violations.values(&self.base.violations)
    }

    fn content(&self, id: &RecordId) -> Option<ContentRecord> {
        self.content.get(&self.base.content, id)
    }

    fn siblings(&self, family: &FamilyKey) -> Vec<ContentRecord> {
        self.content
            .values(&self.base.content)
            .into_iter()
            .filter(|r| &r.family == family)
            .collect()
    }

    fn put_content(&mut self, record: ContentRecord) {
        self.content.put(record.id.clone(), record);
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Shared single-writer store.
#[derive(Debug, Default)]
pub struct Store {
    tables: Mutex<Tables>,
}

impl Store {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `tables`.
    pub fn from_tables(tables: Tables) -> Self {
        Self { tables: Mutex::new(tables) }
    }

    /// Run `work` as one atomic transaction.
    ///
    /// Writes are applied only if `work` returns `Ok`.
    pub async fn transact<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce(&mut dyn Repository) -> EngineResult<T>,
    {
        let mut tables = self.tables.lock().await;

        let mut tx = Transaction::begin(&tables);
        let result = work(&mut tx);
        let writes = tx.commit();

        match result {
            Ok(value) => {
                let rows = writes.apply(&mut tables);
                debug!("Transaction committed {} row(s)", rows);
                Ok(value)
            }
            Err(err) => {
                debug!("Transaction rolled back: {}", err);
                Err(err)
            }
        }
    }

    /// Read committed state.
    pub async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.tables.lock().await;
        f(&tables)
    }

    /// Copy of all committed state.
    pub async fn snapshot(&self) -> Snapshot {
        self.read(|t| Snapshot::from(t)).await
    }
}
