//! JSON snapshots of the store.
//!
//! Rows are written as flat lists so the file stays readable and diffable.
//! Saves go through a temp file and a rename so a crash mid-write never
//! leaves a truncated snapshot behind.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::{Repository, Tables};
use crate::error::{EngineError, EngineResult};
use crate::rewards::ordering::ContentRecord;
use crate::rewards::progress::PlayerProgress;
use crate::rewards::ratelimit::{RateLimitCounter, RateLimitViolation};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable copy of every table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version.
    pub version: u32,
    /// Player progress records.
    pub players: Vec<PlayerProgress>,
    /// Live rate-limit counters.
    pub counters: Vec<RateLimitCounter>,
    /// Violation records.
    pub violations: Vec<RateLimitViolation>,
    /// Ordered content records.
    pub content: Vec<ContentRecord>,
}

impl From<&Tables> for Snapshot {
    fn from(tables: &Tables) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            players: tables.players.values().cloned().collect(),
            counters: tables.counters(),
            violations: tables.violations(),
            content: tables.content.values().cloned().collect(),
        }
    }
}

impl From<Snapshot> for Tables {
    fn from(snapshot: Snapshot) -> Self {
        let mut tables = Tables::default();
        for p in snapshot.players {
            tables.put_player(p);
        }
        for c in snapshot.counters {
            tables.put_counter(c);
        }
        for v in snapshot.violations {
            tables.put_violation(v);
        }
        for r in snapshot.content {
            tables.put_content(r);
        }
        tables
    }
}

impl Snapshot {
    /// Write to `path` atomically.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;

        info!(
            "Saved snapshot to {} ({} players, {} content records)",
            path.display(),
            self.players.len(),
            self.content.len()
        );
        Ok(())
    }

    /// Read from `path`. A missing file yields `None`.
    pub fn load(path: &Path) -> EngineResult<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::Storage(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        info!(
            "Loaded snapshot from {} ({} players)",
            path.display(),
            snapshot.players.len()
        );
        Ok(Some(snapshot))
    }
}
