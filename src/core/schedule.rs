//! Schedule resolution - periodic trigger instants

use crate::core::error::ScheduleError;
use crate::core::period::Period;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Earliest instant `>= now` on the sequence `start, start + period, ...`
///
/// A start already at or after `now` is returned unchanged; a stale start is
/// advanced by whole periods. Pure: the current instant is an argument.
pub fn resolve(
    start: DateTime<Utc>,
    period: Duration,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    if period <= Duration::zero() {
        return Err(ScheduleError::InvalidSchedule(format!(
            "period must be positive, got {}s",
            period.num_seconds()
        )));
    }
    if start >= now {
        return Ok(start);
    }

    let too_far = || ScheduleError::InvalidSchedule("start is too far in the past".into());
    let behind = now - start;
    let periods = match (behind.num_nanoseconds(), period.num_nanoseconds()) {
        (Some(behind), Some(step)) => behind / step,
        _ => behind.num_milliseconds() / period.num_milliseconds().max(1),
    };
    let mut candidate = i32::try_from(periods)
        .ok()
        .and_then(|n| period.checked_mul(n))
        .and_then(|offset| start.checked_add_signed(offset))
        .ok_or_else(too_far)?;
    // Whole periods at or before `now`; step onto the first one not before it
    while candidate < now {
        candidate = candidate.checked_add_signed(period).ok_or_else(too_far)?;
    }
    Ok(candidate)
}

/// A pipeline's schedule and its firing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub start: DateTime<Utc>,
    period: Period,
    /// Last instant (inclusive) that may fire
    pub end: Option<DateTime<Utc>>,
    /// Maximum number of firings
    pub occurrences: Option<u32>,
    last_fired: Option<DateTime<Utc>>,
    fired: u32,
}

impl Schedule {
    pub fn new(start: DateTime<Utc>, period: Period) -> Result<Self, ScheduleError> {
        if !period.is_positive() {
            return Err(ScheduleError::InvalidSchedule(format!(
                "period must be positive, got '{}'",
                period
            )));
        }
        Ok(Self {
            start,
            period,
            end: None,
            occurrences: None,
            last_fired: None,
            fired: 0,
        })
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_occurrences(mut self, occurrences: u32) -> Self {
        self.occurrences = Some(occurrences);
        self
    }

    /// Next instant to fire, never at or before the last fired one
    pub fn next_due(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        if self.occurrences.is_some_and(|max| self.fired >= max) {
            return Ok(None);
        }

        let period = self.period.to_duration();
        let mut candidate = resolve(self.start, period, now)?;
        if let Some(last) = self.last_fired {
            if candidate <= last {
                match last.checked_add_signed(period) {
                    Some(next) => candidate = next,
                    None => return Ok(None),
                }
            }
        }

        if self.end.is_some_and(|end| candidate > end) {
            return Ok(None);
        }
        Ok(Some(candidate))
    }

    /// Record that `instant` fired
    pub fn fire(&mut self, instant: DateTime<Utc>) {
        self.last_fired = Some(instant);
        self.fired += 1;
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }

    /// Number of instants fired so far
    pub fn occurrence_count(&self) -> u32 {
        self.fired
    }

}
