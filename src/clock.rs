//! Frozen wall-clock control for time-relative assertions.

use crate::error::{StepError, StepResult};
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Which way to move from the present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Future,
    Past,
}

impl Direction {
    fn sign(self) -> i64 {
        match self {
            Direction::Future => 1,
            Direction::Past => -1,
        }
    }
}

impl FromStr for Direction {
    type Err = StepError;

    fn from_str(s: &str) -> StepResult<Self> {
        match s {
            "future" => Ok(Direction::Future),
            "past" => Ok(Direction::Past),
            other => Err(StepError::invalid(format!("Invalid direction: {other}"))),
        }
    }
}

/// Shared handle to the session's notion of "now".
///
/// Clones observe the same installed time, so a server running in the
/// same process can be handed a clone.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    frozen: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed time, or the real time when nothing is installed.
    pub fn now(&self) -> DateTime<Utc> {
        self.installed().unwrap_or_else(Utc::now)
    }

    pub fn installed(&self) -> Option<DateTime<Utc>> {
        *self.frozen.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace whatever clock is active with `time`.
    pub fn install(&self, time: DateTime<Utc>) {
        let mut frozen = self.frozen.write().unwrap_or_else(|e| e.into_inner());
        *frozen = Some(time);
    }

    /// Return to real time. No-op when nothing is installed.
    pub fn revert(&self) {
        let mut frozen = self.frozen.write().unwrap_or_else(|e| e.into_inner());
        *frozen = None;
    }

    /// Freeze at real now shifted by `days` in `direction`.
    pub fn advance(&self, days: u32, direction: Direction) -> StepResult<DateTime<Utc>> {
        let time = Duration::try_days(direction.sign() * i64::from(days))
            .and_then(|offset| Utc::now().checked_add_signed(offset))
            .ok_or_else(|| StepError::invalid(format!("{days} days is out of the clock's range")))?;
        self.install(time);
        Ok(time)
    }

    /// Freeze at the named weekday of the current Sunday-based week.
    pub fn set_weekday(&self, name: &str) -> StepResult<DateTime<Utc>> {
        let weekday = Weekday::from_str(name)
            .map_err(|_| StepError::invalid(format!("Invalid weekday: {name}")))?;
        let time = weekday_in_week(Utc::now(), weekday);
        self.install(time);
        Ok(time)
    }
}

/// Same time of day on `weekday` within the week (Sunday first) of `from`.
pub fn weekday_in_week(from: DateTime<Utc>, weekday: Weekday) -> DateTime<Utc> {
    let current = i64::from(from.weekday().num_days_from_sunday());
    let target = i64::from(weekday.num_days_from_sunday());
    from + Duration::days(target - current)
}

/// Parse a timestamp from a body field or header.
///
/// Accepts RFC 3339 strings, RFC 2822 strings (HTTP dates) and numbers
/// as epoch milliseconds.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_timestamp_str(s),
        serde_json::Value::Number(n) => {
            DateTime::from_timestamp_millis(n.as_f64()? as i64)
        }
        _ => None,
    }
}

pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// Whole days from `now` to `then`, rounded to the nearest day.
pub fn days_between(now: DateTime<Utc>, then: DateTime<Utc>) -> i64 {
    let ms = (then - now).num_milliseconds() as f64;
    (ms / 86_400_000.0).round() as i64
}
