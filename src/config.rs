use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;

use crate::calendar::CalendarPolicy;
use crate::engine::EngineConfig;
use crate::model::UserId;
use crate::notify::StaticDirectory;
use crate::sweeper::{SweepConfig, SweepSchedule};

const DEFAULT_HOLIDAYS: &str = "2026-01-26,2026-08-15,2026-10-02,2026-12-25";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown time zone: {0}")]
    InvalidTimezone(String),
    #[error("invalid working hours {open}-{close}: need open < close <= 24")]
    InvalidHours { open: u32, close: u32 },
    #[error("invalid holiday date {0:?}: expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid sweep gate {0:?}: expected HH-HH or \"off\"")]
    InvalidGate(String),
    #[error("invalid directory entry {0:?}: expected user_id=address")]
    InvalidDirectoryEntry(String),
}

/// Process configuration, read from `ALLOTMENT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub mail_queue: usize,
    pub engine: EngineConfig,
    pub sweeps: SweepConfig,
    /// Mail addresses by user, from `ALLOTMENT_DIRECTORY=1=a@example.com,2=b@example.com`.
    pub directory: Vec<(UserId, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<i64>().ok());
        let number = |key: &str, default: i64| parsed(key).unwrap_or(default);

        let data_dir = lookup("ALLOTMENT_DATA_DIR").unwrap_or_else(|| "./data".into());
        let metrics_port: Option<u16> = lookup("ALLOTMENT_METRICS_PORT").and_then(|s| s.parse().ok());

        let tz_name = lookup("ALLOTMENT_TIMEZONE").unwrap_or_else(|| "Asia/Kolkata".into());
        let tz = Tz::from_str(tz_name.trim()).map_err(|_| ConfigError::InvalidTimezone(tz_name.clone()))?;
        let open = number("ALLOTMENT_OPEN_HOUR", 9).clamp(0, 24) as u32;
        let close = number("ALLOTMENT_CLOSE_HOUR", 17).clamp(0, 25) as u32;
        let holidays = parse_holidays(&lookup("ALLOTMENT_HOLIDAYS").unwrap_or_else(|| DEFAULT_HOLIDAYS.into()))?;
        let policy = CalendarPolicy::new(tz, open, close)?.with_holidays(holidays);

        let engine = EngineConfig {
            policy,
            checkin_grace: Duration::minutes(number("ALLOTMENT_CHECKIN_GRACE_MINUTES", 15).max(0)),
            suggestion_limit: number("ALLOTMENT_SUGGESTION_LIMIT", 4).clamp(1, crate::limits::MAX_SUGGESTIONS as i64)
                as usize,
            horizon: Duration::days(number("ALLOTMENT_HORIZON_DAYS", 7).clamp(1, 366)),
        };

        let minute = |key: &str, default: i64| number(key, default).clamp(0, 59) as u32;
        let business_gate = parse_gate(&lookup("ALLOTMENT_SWEEP_GATE").unwrap_or_else(|| "9-17".into()))?;
        let stale_gate = parse_gate(&lookup("ALLOTMENT_STALE_GATE").unwrap_or_else(|| "off".into()))?;
        let sweeps = SweepConfig {
            release: SweepSchedule::hourly_at(minute("ALLOTMENT_RELEASE_MINUTE", 16), business_gate.clone()),
            reminder: SweepSchedule::hourly_at(minute("ALLOTMENT_REMINDER_MINUTE", 10), business_gate),
            stale: SweepSchedule::hourly_at(minute("ALLOTMENT_STALE_MINUTE", 0), stale_gate),
            compact_threshold: number("ALLOTMENT_COMPACT_THRESHOLD", 1000).max(1) as u64,
            ..SweepConfig::default()
        };

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            mail_queue: number("ALLOTMENT_MAIL_QUEUE", 100).max(1) as usize,
            engine,
            sweeps,
            directory: parse_directory(&lookup("ALLOTMENT_DIRECTORY").unwrap_or_default())?,
        })
    }

    pub fn user_directory(&self) -> StaticDirectory {
        let directory = StaticDirectory::new();
        for (user, address) in &self.directory {
            directory.insert(*user, address.clone());
        }
        directory
    }
}

fn parse_holidays(raw: &str) -> Result<Vec<NaiveDate>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ConfigError::InvalidDate(s.to_string())))
        .collect()
}

fn parse_directory(raw: &str) -> Result<Vec<(UserId, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let invalid = || ConfigError::InvalidDirectoryEntry(entry.to_string());
            let (user, address) = entry.split_once('=').ok_or_else(invalid)?;
            let user: u64 = user.trim().parse().map_err(|_| invalid())?;
            let address = address.trim();
            if address.is_empty() {
                return Err(invalid());
            }
            Ok((UserId(user), address.to_string()))
        })
        .collect()
}

/// `"9-17"` → `Some(9..17)`; `"off"` → `None`.
fn parse_gate(raw: &str) -> Result<Option<Range<u32>>, ConfigError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("off") || raw.is_empty() {
        return Ok(None);
    }
    let invalid = || ConfigError::InvalidGate(raw.to_string());
    let (from, to) = raw.split_once('-').ok_or_else(invalid)?;
    let from: u32 = from.trim().parse().map_err(|_| invalid())?;
    let to: u32 = to.trim().parse().map_err(|_| invalid())?;
    if from >= to || to > 24 {
        return Err(invalid());
    }
    Ok(Some(from..to))
}
