//! Clock and Day Boundary
//!
//! Everything "daily" is keyed by a calendar date computed in one fixed
//! UTC offset (the product's home region), never the device time zone.
//! Wall-clock access goes through [`Clock`] so tests can roll days over
//! deterministically.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at the given instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// DAY KEY
// =============================================================================

/// Calendar day in the home-region offset, formatted `YYYY-MM-DD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(pub NaiveDate);

impl DayKey {
    /// The calendar day before this one.
    pub fn previous(self) -> Option<DayKey> {
        self.0.pred_opt().map(DayKey)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DayKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(DayKey)
    }
}

// =============================================================================
// DAY BOUNDARY
// =============================================================================

/// Maps instants to day keys in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary {
    offset: FixedOffset,
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self::utc()
    }
}

impl DayBoundary {
    /// Boundary at UTC midnight.
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Boundary at midnight of `minutes` east of UTC. `None` if out of range.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    /// Offset in use.
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Day key of an instant.
    pub fn day_key(&self, instant: DateTime<Utc>) -> DayKey {
        DayKey(instant.with_timezone(&self.offset).date_naive())
    }

    /// Day key of the clock's current instant.
    pub fn today(&self, clock: &dyn Clock) -> DayKey {
        self.day_key(clock.now())
    }

    /// Whether `key` is the day containing `now`.
    pub fn is_today(&self, key: DayKey, now: DateTime<Utc>) -> bool {
        key == self.day_key(now)
    }

    /// Whether `key` is the day before the one containing `now`.
    pub fn is_yesterday(&self, key: DayKey, now: DateTime<Utc>) -> bool {
        self.day_key(now).previous() == Some(key)
    }

    /// First instant of the day after the one containing `now`.
    pub fn next_rollover(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tomorrow = self.day_key(now).0 + Duration::days(1);
        let local_midnight = tomorrow.and_hms_opt(0, 0, 0).unwrap_or_default();
        match self.offset.from_local_datetime(&local_midnight).single() {
            Some(dt) => dt.with_timezone(&Utc),
            None => now + Duration::days(1),
        }
    }
}
