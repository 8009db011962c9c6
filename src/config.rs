use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::clock::LocalCalendar;
use crate::limits::{MAX_TEMPORARY_BOOKINGS_PER_USER, MINUTE_MS};
use crate::rules::BookingRules;

/// Runtime configuration. Every field has a default; `from_env` overrides
/// them from `STUDIOKEEP_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Name of the studio; part of every slot partition key and the WAL file name.
    pub resource: String,
    pub calendar: LocalCalendar,
    pub rules: BookingRules,
    /// Attempts per create/update before giving up with a conflict.
    pub max_commit_attempts: u32,
    pub store_timeout: Duration,
    pub reaper_interval: Duration,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            resource: "studio".into(),
            calendar: LocalCalendar::utc(),
            rules: BookingRules::default(),
            max_commit_attempts: 5,
            store_timeout: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(60),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {name}={raw:?}");
            None
        }
    }
}

impl Config {
    /// Loads a `.env` file if one exists, then reads the environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let d = Self::default();

        let calendar = var::<i32>("STUDIOKEEP_UTC_OFFSET_MINUTES")
            .and_then(|m| {
                let cal = LocalCalendar::from_offset_minutes(m);
                if cal.is_none() {
                    tracing::warn!("STUDIOKEEP_UTC_OFFSET_MINUTES={m} out of range, using UTC");
                }
                cal
            })
            .unwrap_or(d.calendar);

        let rules = BookingRules {
            min_duration_ms: var::<i64>("STUDIOKEEP_MIN_DURATION_MINUTES")
                .map_or(d.rules.min_duration_ms, |m| m * MINUTE_MS),
            grid_minutes: var("STUDIOKEEP_GRID_MINUTES").unwrap_or(d.rules.grid_minutes),
            min_lead_ms: var::<i64>("STUDIOKEEP_LEAD_TIME_MINUTES")
                .map_or(d.rules.min_lead_ms, |m| m * MINUTE_MS),
            open_hour: var("STUDIOKEEP_OPEN_HOUR").unwrap_or(d.rules.open_hour),
            close_hour: var("STUDIOKEEP_CLOSE_HOUR").unwrap_or(d.rules.close_hour),
            max_temporary_per_user: var("STUDIOKEEP_MAX_TEMPORARY_PER_USER")
                .unwrap_or(MAX_TEMPORARY_BOOKINGS_PER_USER),
        };

        Self {
            data_dir: std::env::var("STUDIOKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            resource: std::env::var("STUDIOKEEP_RESOURCE").unwrap_or(d.resource),
            calendar,
            rules,
            max_commit_attempts: var::<u32>("STUDIOKEEP_MAX_COMMIT_ATTEMPTS")
                .map_or(d.max_commit_attempts, |n| n.max(1)),
            store_timeout: var("STUDIOKEEP_STORE_TIMEOUT_MS")
                .map_or(d.store_timeout, Duration::from_millis),
            reaper_interval: var("STUDIOKEEP_REAPER_INTERVAL_SECS")
                .map_or(d.reaper_interval, Duration::from_secs),
            compact_threshold: var("STUDIOKEEP_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: var("STUDIOKEEP_METRICS_PORT"),
        }
    }
}
