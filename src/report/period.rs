use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc};
use clap::ValueEnum;
use serde::Serialize;

use crate::{error::TrackerError, utils::time::day_start};

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Day,
    Week,
    Month,
}

impl Display for PeriodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodKind::Day => write!(f, "day"),
            PeriodKind::Week => write!(f, "week"),
            PeriodKind::Month => write!(f, "month"),
        }
    }
}

impl FromStr for PeriodKind {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(PeriodKind::Day),
            "week" => Ok(PeriodKind::Week),
            "month" => Ok(PeriodKind::Month),
            _ => Err(TrackerError::InvalidPeriod(value.to_string())),
        }
    }
}

/// Half open range of calendar dates `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PeriodBoundary {
    pub kind: PeriodKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodBoundary {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// The boundary as instants, with days starting at local midnight of `tz`.
    pub fn instants<Tz: TimeZone>(&self, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            day_start(tz, self.start).with_timezone(&Utc),
            day_start(tz, self.end).with_timezone(&Utc),
        )
    }
}

/// Calendar aligned period of `kind` containing `reference`. Weeks start on Monday.
pub fn resolve(kind: PeriodKind, reference: NaiveDate) -> Result<PeriodBoundary, TrackerError> {
    let (start, end) = match kind {
        PeriodKind::Day => (reference, add_days(reference, 1)?),
        PeriodKind::Week => {
            let monday = reference
                .checked_sub_days(Days::new(
                    reference.weekday().num_days_from_monday() as u64,
                ))
                .ok_or(TrackerError::DateOutOfRange)?;
            (monday, add_days(monday, 7)?)
        }
        PeriodKind::Month => {
            let first = first_of_month(reference.year(), reference.month())?;
            (first, first_of_next_month(reference.year(), reference.month())?)
        }
    };
    Ok(PeriodBoundary { kind, start, end })
}

/// Consecutive days of one month, both ends inclusive.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct WeekRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WeekRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl Display for WeekRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%b %d"),
            self.end.format("%b %d")
        )
    }
}

/// Splits a month into 7 day strides starting on the 1st. The last stride is cut at the end of
/// the month, so the ranges never reach into the next one.
pub fn split_month_into_weeks(year: i32, month: u32) -> Result<Vec<WeekRange>, TrackerError> {
    let mut start = first_of_month(year, month)?;
    let last = first_of_next_month(year, month)?
        .pred_opt()
        .ok_or(TrackerError::DateOutOfRange)?;

    let mut weeks = Vec::with_capacity(5);
    loop {
        let end = add_days(start, 6).map_or(last, |end| end.min(last));
        weeks.push(WeekRange { start, end });
        if end == last {
            return Ok(weeks);
        }
        start = add_days(end, 1)?;
    }
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate, TrackerError> {
    date.checked_add_days(Days::new(days))
        .ok_or(TrackerError::DateOutOfRange)
}

fn first_of_month(year: i32, month: u32) -> Result<NaiveDate, TrackerError> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or(TrackerError::DateOutOfRange)
}

fn first_of_next_month(year: i32, month: u32) -> Result<NaiveDate, TrackerError> {
    match month {
        12 => first_of_month(year + 1, 1),
        _ => first_of_month(year, month + 1),
    }
}
