//! Durations written as `"<int> <unit>"` and pipeline date-times

use crate::core::error::ScheduleError;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Format of date-times inside templates (always UTC)
pub const PIPELINE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn period_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<number>-?\d+)\s+(?P<unit>[A-Za-z]+)\s*$")
            .expect("period regex is valid")
    })
}

/// Unit of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl PeriodUnit {
    fn seconds(self) -> i64 {
        match self {
            PeriodUnit::Seconds => 1,
            PeriodUnit::Minutes => 60,
            PeriodUnit::Hours => 3_600,
            PeriodUnit::Days => 86_400,
            PeriodUnit::Weeks => 604_800,
        }
    }

    fn name(self) -> &'static str {
        match self {
            PeriodUnit::Seconds => "seconds",
            PeriodUnit::Minutes => "minutes",
            PeriodUnit::Hours => "hours",
            PeriodUnit::Days => "days",
            PeriodUnit::Weeks => "weeks",
        }
    }

    fn parse(unit: &str) -> Option<Self> {
        let unit = unit.to_ascii_lowercase();
        let singular = unit.strip_suffix('s').unwrap_or(&unit);
        match singular {
            "second" => Some(PeriodUnit::Seconds),
            "minute" => Some(PeriodUnit::Minutes),
            "hour" => Some(PeriodUnit::Hours),
            "day" => Some(PeriodUnit::Days),
            "week" => Some(PeriodUnit::Weeks),
            _ => None,
        }
    }
}

/// A fixed-length period such as `15 minutes` or `1 hours`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub amount: i64,
    pub unit: PeriodUnit,
}

impl Period {
    pub fn new(amount: i64, unit: PeriodUnit) -> Self {
        Self { amount, unit }
    }

    /// Parse `"<int> <unit>"`; months and years are rejected because they have no fixed length
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let caps = period_regex()
            .captures(text)
            .ok_or_else(|| ScheduleError::InvalidPeriod(text.to_string()))?;
        let amount: i64 = caps["number"]
            .parse()
            .map_err(|_| ScheduleError::InvalidPeriod(text.to_string()))?;
        let unit = PeriodUnit::parse(&caps["unit"])
            .ok_or_else(|| ScheduleError::InvalidPeriod(text.to_string()))?;
        amount
            .checked_mul(unit.seconds())
            .and_then(Duration::try_seconds)
            .ok_or_else(|| ScheduleError::InvalidPeriod(text.to_string()))?;
        Ok(Self { amount, unit })
    }

    /// Express a duration in the largest unit (up to days) that divides it exactly
    pub fn from_duration(duration: Duration) -> Self {
        let secs = duration.num_seconds();
        for unit in [PeriodUnit::Days, PeriodUnit::Hours, PeriodUnit::Minutes] {
            if secs != 0 && secs % unit.seconds() == 0 {
                return Self::new(secs / unit.seconds(), unit);
            }
        }
        if secs == 0 {
            return Self::new(0, PeriodUnit::Minutes);
        }
        Self::new(secs, PeriodUnit::Seconds)
    }

    /// Saturates at the bounds of `Duration`; parsed periods always fit
    pub fn to_duration(self) -> Duration {
        let seconds = self.amount.saturating_mul(self.unit.seconds());
        Duration::try_seconds(seconds).unwrap_or(if seconds < 0 {
            Duration::MIN
        } else {
            Duration::MAX
        })
    }

    pub fn is_positive(self) -> bool {
        self.amount > 0
    }

    /// Convert to a std duration; `None` for zero or negative periods
    pub fn to_std(self) -> Option<std::time::Duration> {
        self.to_duration().to_std().ok().filter(|d| !d.is_zero())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit.name())
    }
}

/// Parse a template date-time (`YYYY-MM-ddTHH:mm:ss`, UTC)
pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>, ScheduleError> {
    let trimmed = text.trim();
    NaiveDateTime::parse_from_str(trimmed, PIPELINE_DATETIME_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|_| ScheduleError::InvalidDateTime(text.to_string()))
}

/// Render a date-time in the template format
pub fn format_datetime(instant: DateTime<Utc>) -> String {
    instant.format(PIPELINE_DATETIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_period() {
        assert_eq!(Period::parse("15 minutes").unwrap().to_duration(), Duration::minutes(15));
        assert_eq!(Period::parse("3 hours").unwrap().to_duration(), Duration::hours(3));
        assert_eq!(Period::parse("1 days").unwrap().to_duration(), Duration::days(1));
        assert_eq!(Period::parse("1 hour").unwrap().to_duration(), Duration::hours(1));
        assert_eq!(Period::parse("2 weeks").unwrap().to_duration(), Duration::weeks(2));
    }

    #[test]
    fn test_parse_period_rejects_garbage() {
        assert!(Period::parse("hourly").is_err());
        assert!(Period::parse("1 months").is_err());
        assert!(Period::parse("").is_err());
    }

    #[test]
    fn test_parse_period_rejects_amounts_beyond_duration_range() {
        assert!(matches!(
            Period::parse("99999999999999999 weeks"),
            Err(ScheduleError::InvalidPeriod(_))
        ));
        assert!(Period::parse("9223372036854775807 seconds").is_err());
        assert!(Period::parse("-99999999999999999 days").is_err());
        assert_eq!(Period::new(i64::MAX, PeriodUnit::Weeks).to_duration(), Duration::MAX);
    }

    #[test]
    fn test_period_normalizes_to_largest_unit() {
        assert_eq!(Period::from_duration(Duration::minutes(50)).to_string(), "50 minutes");
        assert_eq!(Period::from_duration(Duration::minutes(60)).to_string(), "1 hours");
        assert_eq!(Period::from_duration(Duration::hours(48)).to_string(), "2 days");
        assert_eq!(Period::from_duration(Duration::seconds(90)).to_string(), "90 seconds");
        assert_eq!(Period::from_duration(Duration::minutes(-10)).to_string(), "-10 minutes");
    }

    #[test]
    fn test_negative_period_has_no_std_duration() {
        assert!(Period::parse("-5 minutes").unwrap().to_std().is_none());
        assert!(Period::parse("0 hours").unwrap().to_std().is_none());
    }

    #[test]
    fn test_datetime_round_trip_format() {
        let instant = parse_datetime("2199-01-01T00:00:00").unwrap();
        assert_eq!(format_datetime(instant), "2199-01-01T00:00:00");
        assert!(parse_datetime("yesterday").is_err());
    }
}
