use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Today,
    Week,
    Month,
    All,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::All => "all",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown time range `{0}` (expected today, week, month or all)")]
pub struct UnknownTimeRange(pub String);

impl FromStr for TimeRange {
    type Err = UnknownTimeRange;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "all" => Ok(Self::All),
            _ => Err(UnknownTimeRange(value.to_string())),
        }
    }
}

/// Source of "now". Injected so window boundaries can be pinned in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Maps a [`TimeRange`] to the earliest instant it covers, using calendar
/// boundaries in `tz`. Nothing is cached: each call reads the clock again.
#[derive(Clone)]
pub struct TimeWindowSelector<Tz: TimeZone> {
    clock: Arc<dyn Clock>,
    tz: Tz,
    week_start: Weekday,
}

impl<Tz: TimeZone> TimeWindowSelector<Tz> {
    pub fn new(clock: Arc<dyn Clock>, tz: Tz, week_start: Weekday) -> Self {
        Self {
            clock,
            tz,
            week_start,
        }
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    pub fn lower_bound_for(&self, range: TimeRange) -> Option<DateTime<Utc>> {
        let today = self.clock.now().with_timezone(&self.tz).date_naive();
        let first_day = match range {
            TimeRange::Today => today,
            TimeRange::Week => {
                let offset = (7 + today.weekday().num_days_from_monday()
                    - self.week_start.num_days_from_monday())
                    % 7;
                today - Duration::days(i64::from(offset))
            }
            TimeRange::Month => today.with_day(1).unwrap_or(today),
            TimeRange::All => return None,
        };
        Some(self.start_of(first_day))
    }

    fn start_of(&self, day: NaiveDate) -> DateTime<Utc> {
        let midnight = day.and_time(NaiveTime::MIN);
        match self.tz.from_local_datetime(&midnight) {
            LocalResult::Single(start) | LocalResult::Ambiguous(start, _) => start.with_timezone(&Utc),
            // Midnight skipped by a DST jump; the first valid instant is within the hour.
            LocalResult::None => {
                let shifted = midnight + Duration::hours(1);
                self.tz
                    .from_local_datetime(&shifted)
                    .earliest()
                    .map(|start| start.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
            }
        }
    }
}

pub fn parse_weekday(value: &str) -> Option<Weekday> {
    value.trim().parse::<Weekday>().ok()
}
