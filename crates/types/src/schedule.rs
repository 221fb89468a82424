//! Time-based trigger definitions.
//!
//! A schedule fires once per fixed interval anchored at the workflow's start
//! date. A run covers the interval that ends at its fire time, so the first run
//! fires at `start + interval` with a logical date of `start`.

use std::fmt;

use chrono::{DateTime, Days, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted interval, roughly one hundred years.
pub const MAX_INTERVAL_SECONDS: u64 = 100 * 365 * 86_400;

/// Error raised when a schedule expression cannot be understood.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid schedule '{expression}': {reason}")]
pub struct ScheduleParseError {
    pub expression: String,
    pub reason: String,
}

/// Recurrence of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Schedule {
    /// A single run for the first interval, never repeated.
    Once,
    Hourly,
    #[default]
    Daily,
    Weekly,
    /// Explicit fixed interval in seconds.
    Every(u64),
}

impl Schedule {
    /// Parses `@once`, `@hourly`, `@daily`, `@weekly`, or an interval such as `30m`, `6h`, `2d`.
    pub fn parse(expression: &str) -> Result<Self, ScheduleParseError> {
        let trimmed = expression.trim();
        let error = |reason: &str| ScheduleParseError {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };
        match trimmed {
            "@once" => return Ok(Self::Once),
            "@hourly" => return Ok(Self::Hourly),
            "@daily" => return Ok(Self::Daily),
            "@weekly" => return Ok(Self::Weekly),
            "" => return Err(error("expression is empty")),
            _ => {}
        }
        if trimmed.starts_with('@') {
            return Err(error("unknown preset; expected @once, @hourly, @daily or @weekly"));
        }

        let (digits, unit) = trimmed.split_at(trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len()));
        let amount: u64 = digits.parse().map_err(|_| error("interval must start with a number"))?;
        let unit_seconds: u64 = match unit {
            "" | "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => return Err(error("interval unit must be one of s, m, h, d")),
        };
        let seconds = amount
            .checked_mul(unit_seconds)
            .filter(|seconds| *seconds <= MAX_INTERVAL_SECONDS)
            .ok_or_else(|| error("interval must not exceed 100 years"))?;
        if seconds == 0 {
            return Err(error("interval must be greater than zero"));
        }
        Ok(Self::Every(seconds))
    }

    /// Length of one interval; `None` for `@once`.
    ///
    /// Explicit intervals are clamped to `1s..=MAX_INTERVAL_SECONDS`.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Once => None,
            Self::Hourly => Some(Duration::hours(1)),
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::weeks(1)),
            Self::Every(seconds) => i64::try_from((*seconds).clamp(1, MAX_INTERVAL_SECONDS))
                .ok()
                .map(Duration::seconds),
        }
    }

    /// Logical dates whose interval has fully elapsed by `now` and that were not yet run.
    ///
    /// `last_logical_date` is the logical date of the most recent recorded run. With
    /// `catchup` disabled only the latest due interval is returned.
    pub fn due_logical_dates(
        &self,
        start: DateTime<Utc>,
        last_logical_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        catchup: bool,
    ) -> Vec<DateTime<Utc>> {
        let Some(interval) = self.interval() else {
            return match last_logical_date {
                Some(_) => Vec::new(),
                None if start <= now => vec![start],
                None => Vec::new(),
            };
        };

        match start.checked_add_signed(interval) {
            Some(first_fire) if first_fire <= now => {}
            _ => return Vec::new(),
        }

        let step = interval.num_seconds();
        let elapsed_intervals = (now - start).num_seconds() / step;
        let Some(latest_due) = start.checked_add_signed(Duration::seconds(step * (elapsed_intervals - 1))) else {
            return Vec::new();
        };

        let first_candidate = match last_logical_date {
            Some(last) if last >= latest_due => return Vec::new(),
            Some(last) => match last.checked_add_signed(interval) {
                Some(next) => next,
                None => return Vec::new(),
            },
            None => start,
        };

        if !catchup {
            return vec![latest_due];
        }

        let mut due = Vec::new();
        let mut cursor = Some(first_candidate.max(start));
        while let Some(logical_date) = cursor
            && logical_date <= latest_due
        {
            due.push(logical_date);
            cursor = logical_date.checked_add_signed(interval);
        }
        due
    }

    /// Wall-clock time at which the run for `logical_date` becomes due.
    pub fn fire_time(&self, logical_date: DateTime<Utc>) -> DateTime<Utc> {
        self.interval().map_or(logical_date, |interval| {
            logical_date.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Next fire time strictly after `now`.
    ///
    /// `None` for an exhausted `@once` schedule or when the next fire time is
    /// past the last representable instant.
    pub fn next_fire_after(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Some(interval) = self.interval() else {
            return (start > now).then_some(start);
        };
        let first_fire = start.checked_add_signed(interval)?;
        if now < first_fire {
            return Some(first_fire);
        }
        let step = interval.num_seconds();
        let elapsed = (now - first_fire).num_seconds() / step;
        let offset = step.checked_mul(elapsed.checked_add(1)?)?;
        first_fire.checked_add_signed(Duration::try_seconds(offset)?)
    }
}

impl TryFrom<String> for Schedule {
    type Error = ScheduleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.to_string()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => f.write_str("@once"),
            Self::Hourly => f.write_str("@hourly"),
            Self::Daily => f.write_str("@daily"),
            Self::Weekly => f.write_str("@weekly"),
            Self::Every(seconds) if seconds % 86_400 == 0 => write!(f, "{}d", seconds / 86_400),
            Self::Every(seconds) if seconds % 3_600 == 0 => write!(f, "{}h", seconds / 3_600),
            Self::Every(seconds) if seconds % 60 == 0 => write!(f, "{}m", seconds / 60),
            Self::Every(seconds) => write!(f, "{}s", seconds),
        }
    }
}

/// When the schedule starts counting intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartDate {
    /// Fixed instant.
    Absolute(DateTime<Utc>),
    /// Midnight UTC a number of days before the moment the definition is evaluated.
    Relative { days_ago: u32 },
}

impl Default for StartDate {
    fn default() -> Self {
        Self::Relative { days_ago: 1 }
    }
}

impl StartDate {
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Absolute(instant) => *instant,
            Self::Relative { days_ago } => {
                let day = now
                    .date_naive()
                    .checked_sub_days(Days::new(u64::from(*days_ago)))
                    .unwrap_or(NaiveDate::MIN);
                let midnight = day.and_hms_opt(0, 0, 0).unwrap_or_default();
                Utc.from_utc_datetime(&midnight)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).expect("timestamp").with_timezone(&Utc)
    }

    #[test]
    fn parses_presets_and_intervals() {
        assert_eq!(Schedule::parse("@daily"), Ok(Schedule::Daily));
        assert_eq!(Schedule::parse(" @once "), Ok(Schedule::Once));
        assert_eq!(Schedule::parse("6h"), Ok(Schedule::Every(21_600)));
        assert_eq!(Schedule::parse("90"), Ok(Schedule::Every(90)));
        assert!(Schedule::parse("@monthly").is_err());
        assert!(Schedule::parse("0m").is_err());
        assert!(Schedule::parse("5w").is_err());
        assert_eq!(Schedule::Every(21_600).to_string(), "6h");
    }

    #[test]
    fn oversized_intervals_are_rejected() {
        assert!(Schedule::parse("300000000000000000d").is_err());
        assert!(Schedule::parse("9000000000000000000s").is_err());
        assert!(Schedule::parse("99999999999999999999999h").is_err());
        assert_eq!(Schedule::parse("36500d"), Ok(Schedule::Every(MAX_INTERVAL_SECONDS)));
        assert_eq!(Schedule::Every(0).interval(), Some(Duration::seconds(1)));
        assert_eq!(
            Schedule::Every(u64::MAX).interval(),
            Some(Duration::seconds(MAX_INTERVAL_SECONDS as i64))
        );
    }

    #[test]
    fn extreme_dates_do_not_overflow() {
        let late = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        let schedule = Schedule::Every(MAX_INTERVAL_SECONDS);
        assert!(schedule.due_logical_dates(late, None, DateTime::<Utc>::MAX_UTC, true).is_empty());
        assert_eq!(schedule.next_fire_after(late, late), None);
        assert_eq!(schedule.fire_time(late), DateTime::<Utc>::MAX_UTC);

        let early = DateTime::<Utc>::MIN_UTC;
        let due = Schedule::Daily.due_logical_dates(early, None, DateTime::<Utc>::MAX_UTC, false);
        assert_eq!(due.len(), 1);
        assert!(Schedule::Daily.next_fire_after(early, DateTime::<Utc>::MAX_UTC).is_none());

        let now = at("2026-10-19T15:30:00Z");
        assert_eq!(
            StartDate::Relative { days_ago: u32::MAX }.resolve(now).date_naive(),
            NaiveDate::MIN
        );
    }

    #[test]
    fn without_catchup_only_latest_interval_is_due() {
        let start = at("2026-10-10T00:00:00Z");
        let now = at("2026-10-19T08:00:00Z");
        let due = Schedule::Daily.due_logical_dates(start, None, now, false);
        assert_eq!(due, vec![at("2026-10-18T00:00:00Z")]);
    }

    #[test]
    fn with_catchup_every_missed_interval_is_due() {
        let start = at("2026-10-15T00:00:00Z");
        let now = at("2026-10-19T08:00:00Z");
        let last = Some(at("2026-10-16T00:00:00Z"));
        let due = Schedule::Daily.due_logical_dates(start, last, now, true);
        assert_eq!(due, vec![at("2026-10-17T00:00:00Z"), at("2026-10-18T00:00:00Z")]);
    }

    #[test]
    fn nothing_due_before_first_interval_closes_or_after_latest_run() {
        let start = at("2026-10-19T00:00:00Z");
        assert!(Schedule::Daily.due_logical_dates(start, None, at("2026-10-19T23:59:59Z"), false).is_empty());

        let start = at("2026-10-10T00:00:00Z");
        let last = Some(at("2026-10-18T00:00:00Z"));
        assert!(Schedule::Daily.due_logical_dates(start, last, at("2026-10-19T08:00:00Z"), false).is_empty());
    }

    #[test]
    fn once_runs_a_single_time() {
        let start = at("2026-10-18T00:00:00Z");
        let now = at("2026-10-19T00:00:00Z");
        assert_eq!(Schedule::Once.due_logical_dates(start, None, now, false), vec![start]);
        assert!(Schedule::Once.due_logical_dates(start, Some(start), now, false).is_empty());
        assert_eq!(Schedule::Once.next_fire_after(start, now), None);
    }

    #[test]
    fn next_fire_time_follows_interval_grid() {
        let start = at("2026-10-18T00:00:00Z");
        assert_eq!(
            Schedule::Daily.next_fire_after(start, at("2026-10-18T12:00:00Z")),
            Some(at("2026-10-19T00:00:00Z"))
        );
        assert_eq!(
            Schedule::Daily.next_fire_after(start, at("2026-10-19T00:00:00Z")),
            Some(at("2026-10-20T00:00:00Z"))
        );
        assert_eq!(Schedule::Daily.fire_time(start), at("2026-10-19T00:00:00Z"));
    }

    #[test]
    fn relative_start_date_resolves_to_midnight() {
        let now = at("2026-10-19T15:30:00Z");
        assert_eq!(StartDate::Relative { days_ago: 1 }.resolve(now), at("2026-10-18T00:00:00Z"));
        let start: StartDate = serde_json::from_str(r#""2026-01-01T00:00:00Z""#).expect("absolute start");
        assert_eq!(start.resolve(now), at("2026-01-01T00:00:00Z"));
        let start: StartDate = serde_json::from_str(r#"{"days_ago": 2}"#).expect("relative start");
        assert_eq!(start, StartDate::Relative { days_ago: 2 });
    }
}
