use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("Invalid month {0}: expected a number from 1 to 12")]
    InvalidMonth(u32),
    #[error("Invalid date range: start {start} is not before end {end}")]
    EmptyRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Date out of supported range: {0}-{1:02}")]
    OutOfRange(i32, u32),
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, PeriodError> {
        if start >= end {
            return Err(PeriodError::EmptyRange { start, end });
        }
        Ok(DateRange { start, end })
    }

    /// The whole calendar month `year-month`, midnight UTC to midnight UTC.
    pub fn month(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let start = midnight(year, month)?;
        let end = midnight(next_year, next_month)?;
        DateRange::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// `YYYY-MM` of the start instant, used to name per-period artifacts.
    pub fn label(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    /// Last millisecond inside the range, as remote APIs expect an inclusive bound.
    pub fn last_millis(&self) -> i64 {
        self.end.timestamp_millis() - 1
    }
}

fn midnight(year: i32, month: u32) -> Result<DateTime<Utc>, PeriodError> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .ok_or(PeriodError::OutOfRange(year, month))
}

/// Turns an optional month selector into a concrete range relative to `now`.
///
/// * `None` is the calendar month before `now`.
/// * `1..=11` is that month of `now`'s year.
/// * `12` is December of the year before `now`, so a December claim can be
///   filed after the year has rolled over.
pub fn resolve_month(month: Option<u32>, now: DateTime<Utc>) -> Result<DateRange, PeriodError> {
    match month {
        None => {
            let (year, month) = if now.month() == 1 {
                (now.year() - 1, 12)
            } else {
                (now.year(), now.month() - 1)
            };
            DateRange::month(year, month)
        }
        Some(12) => DateRange::month(now.year() - 1, 12),
        Some(m @ 1..=11) => DateRange::month(now.year(), m),
        Some(m) => Err(PeriodError::InvalidMonth(m)),
    }
}
