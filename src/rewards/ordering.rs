//! Sibling Ordering
//!
//! Content records (levels, a level's difficulties, a difficulty's
//! questions) carry an `order` field that must stay a dense `1..N`
//! sequence within their family. Every reorder re-derives the full
//! sequence from a canonical sort, so gaps or duplicates left behind by
//! earlier failures are repaired on the next move.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::ids::RecordId;
use crate::error::{EngineError, EngineResult};

/// Parent scope shared by a set of sibling records.
///
/// String form: `levels`, `difficulties/<level>`, `questions/<level>/<difficulty>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FamilyKey {
    /// All levels.
    Levels,
    /// Difficulties under one level.
    Difficulties {
        /// Parent level.
        level: RecordId,
    },
    /// Questions under one level and difficulty.
    Questions {
        /// Parent level.
        level: RecordId,
        /// Parent difficulty.
        difficulty: RecordId,
    },
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FamilyKey::Levels => f.write_str("levels"),
            FamilyKey::Difficulties { level } => write!(f, "difficulties/{level}"),
            FamilyKey::Questions { level, difficulty } => write!(f, "questions/{level}/{difficulty}"),
        }
    }
}

impl FromStr for FamilyKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.iter().skip(1).any(|p| p.is_empty()) {
            return Err(format!("empty segment in family key: {s}"));
        }
        match parts.as_slice() {
            ["levels"] => Ok(FamilyKey::Levels),
            ["difficulties", level] => Ok(FamilyKey::Difficulties { level: (*level).into() }),
            ["questions", level, difficulty] => Ok(FamilyKey::Questions {
                level: (*level).into(),
                difficulty: (*difficulty).into(),
            }),
            _ => Err(format!("unknown family key: {s}")),
        }
    }
}

impl From<FamilyKey> for String {
    fn from(key: FamilyKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for FamilyKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A content record participating in a family ordering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Record id, unique across all families.
    pub id: RecordId,
    /// Family the record belongs to.
    pub family: FamilyKey,
    /// 1-based position within the family.
    pub order: u32,
    /// Creation time, the tie-break for equal `order` values.
    pub created_at: DateTime<Utc>,
}

/// Move direction for a reorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Towards position 1.
    Up,
    /// Towards position N.
    Down,
}

/// Sort by `(order, created_at, id)`: a total order even when stored
/// order values have drifted.
pub fn canonical_sort(siblings: &mut [ContentRecord]) {
    siblings.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

/// Rewrite every record's `order` to its 1-based index.
pub fn renumber(siblings: &mut [ContentRecord]) {
    for (idx, record) in siblings.iter_mut().enumerate() {
        record.order = idx as u32 + 1;
    }
}

/// Move `member` one step in `direction` and renumber the whole family.
///
/// Moving past either edge leaves the sequence unchanged but still
/// renumbers. Returns the family in its new order.
pub fn reorder(
    family: &FamilyKey,
    mut siblings: Vec<ContentRecord>,
    member: &RecordId,
    direction: Direction,
) -> EngineResult<Vec<ContentRecord>> {
    if siblings.is_empty() {
        return Err(EngineError::not_found("family", family));
    }

    canonical_sort(&mut siblings);

    let idx = siblings
        .iter()
        .position(|r| &r.id == member)
        .ok_or_else(|| EngineError::not_found("record", member))?;

    let target = match direction {
        Direction::Up => idx.checked_sub(1),
        Direction::Down => Some(idx + 1).filter(|t| *t < siblings.len()),
    };

    if let Some(target) = target {
        siblings.swap(idx, target);
    }

    renumber(&mut siblings);
    Ok(siblings)
}
