//! Engine configuration.

use chrono::TimeDelta;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::core::clock::DayBoundary;
use crate::rewards::ledger::LevelTable;
use crate::rewards::ratelimit::{RateAction, RatePolicy};

/// Default home-region offset (UTC+08:00).
pub const DEFAULT_DAY_OFFSET_MINUTES: i32 = 480;

/// Default per-operation coin ceiling.
pub const DEFAULT_COIN_CEILING: u64 = 50;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Variable is set but does not parse.
    #[error("invalid value for {var}: {value:?}")]
    Invalid {
        /// Environment variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Progression engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Calendar days are computed at this offset from UTC.
    pub day_boundary: DayBoundary,
    /// Most currency a single operation may award.
    pub coin_ceiling_per_operation: u64,
    /// Rejections this close to the previous one update the same violation.
    pub violation_coalesce: chrono::Duration,
    /// Violations last seen longer ago than this are swept.
    pub violation_retention: chrono::Duration,
    /// JSON snapshot location, if persistence is enabled.
    pub state_path: Option<PathBuf>,
    /// Level thresholds and artifacts.
    pub level_table: LevelTable,
    /// Rate-limit policy per action.
    pub rate_policies: BTreeMap<RateAction, RatePolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            day_boundary: DayBoundary::from_offset_minutes(DEFAULT_DAY_OFFSET_MINUTES)
                .unwrap_or_else(DayBoundary::utc),
            coin_ceiling_per_operation: DEFAULT_COIN_CEILING,
            violation_coalesce: chrono::Duration::seconds(300),
            violation_retention: chrono::Duration::hours(168),
            state_path: None,
            level_table: LevelTable::default(),
            rate_policies: RateAction::ALL.iter().map(|a| (*a, a.policy())).collect(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(minutes) = parse_var::<i32>("DAY_OFFSET_MINUTES")? {
            config.day_boundary = DayBoundary::from_offset_minutes(minutes).ok_or(ConfigError::Invalid {
                var: "DAY_OFFSET_MINUTES",
                value: minutes.to_string(),
            })?;
        }
        if let Some(ceiling) = parse_var::<u64>("COIN_CEILING_PER_OPERATION")? {
            config.coin_ceiling_per_operation = ceiling;
        }
        if let Some(secs) = parse_var::<i64>("VIOLATION_COALESCE_SECS")? {
            config.violation_coalesce = positive_span("VIOLATION_COALESCE_SECS", secs, TimeDelta::try_seconds)?;
        }
        if let Some(hours) = parse_var::<i64>("VIOLATION_RETENTION_HOURS")? {
            config.violation_retention = positive_span("VIOLATION_RETENTION_HOURS", hours, TimeDelta::try_hours)?;
        }
        config.state_path = std::env::var("STATE_PATH").ok().map(PathBuf::from);

        Ok(config)
    }

    /// Policy for `action`, falling back to the built-in one.
    pub fn policy(&self, action: RateAction) -> RatePolicy {
        self.rate_policies.get(&action).copied().unwrap_or_else(|| action.policy())
    }
}

/// Parse an optional environment variable.
pub(crate) fn parse_var<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(None),
    }
}

/// Convert a raw count to a span; zero, negative and unrepresentable counts are rejected.
fn positive_span(var: &'static str, raw: i64, unit: fn(i64) -> Option<TimeDelta>) -> Result<TimeDelta, ConfigError> {
    unit(raw).filter(|span| *span > TimeDelta::zero()).ok_or(ConfigError::Invalid {
        var,
        value: raw.to_string(),
    })
}
