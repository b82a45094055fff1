use chrono::{Datelike, TimeZone, Weekday};
use serde::Serialize;
use tracing::trace;

use crate::{error::TrackerError, storage::DurableRecord};

use super::period::{split_month_into_weeks, PeriodBoundary, PeriodKind};

/// Seconds worked per sub-period (rows) and task (columns). Every cell is present, pairs that
/// were never observed are zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedTable {
    pub kind: PeriodKind,
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    /// `cells[row][column]`
    pub cells: Vec<Vec<i64>>,
}

impl AggregatedTable {
    /// Table of a window without any records.
    pub fn empty(kind: PeriodKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
            columns: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn cell(&self, row: &str, column: &str) -> Option<i64> {
        let row = self.rows.iter().position(|v| v == row)?;
        let column = self.columns.iter().position(|v| v == column)?;
        Some(self.cells[row][column])
    }

    pub fn column_totals(&self) -> Vec<i64> {
        (0..self.columns.len())
            .map(|column| self.cells.iter().map(|row| row[column]).sum())
            .collect()
    }

    pub fn row_totals(&self) -> Vec<i64> {
        self.cells.iter().map(|row| row.iter().sum()).collect()
    }

    pub fn total(&self) -> i64 {
        self.cells.iter().flatten().sum()
    }
}

/// Sums the durations of records starting inside `boundary`, dates being taken in `tz`.
///
/// Rows are the single day for [PeriodKind::Day], Monday to Sunday for [PeriodKind::Week] and
/// the ranges of [split_month_into_weeks] for [PeriodKind::Month]. Columns are in the order the
/// tasks first appear in time.
pub fn aggregate<'a, Tz: TimeZone>(
    records: impl IntoIterator<Item = &'a DurableRecord>,
    boundary: &PeriodBoundary,
    tz: &Tz,
) -> Result<AggregatedTable, TrackerError> {
    let mut records = records
        .into_iter()
        .map(|record| (record.start.with_timezone(tz).date_naive(), record))
        .filter(|(date, _)| boundary.contains(*date))
        .collect::<Vec<_>>();
    if records.is_empty() {
        return Ok(AggregatedTable::empty(boundary.kind));
    }
    records.sort_by_key(|(_, record)| record.start);

    let weeks = match boundary.kind {
        PeriodKind::Month => split_month_into_weeks(boundary.start.year(), boundary.start.month())?,
        PeriodKind::Day | PeriodKind::Week => Vec::new(),
    };
    let rows = match boundary.kind {
        PeriodKind::Day => vec![boundary.start.format("%Y-%m-%d").to_string()],
        PeriodKind::Week => week_days().map(|day| day.to_string()).collect(),
        PeriodKind::Month => weeks.iter().map(|week| week.to_string()).collect(),
    };

    let mut columns = Vec::<String>::new();
    let mut cells = vec![Vec::<i64>::new(); rows.len()];
    for (date, record) in records {
        let row = match boundary.kind {
            PeriodKind::Day => Some(0),
            PeriodKind::Week => Some(date.weekday().num_days_from_monday() as usize),
            PeriodKind::Month => weeks.iter().position(|week| week.contains(date)),
        };
        let Some(row) = row else {
            continue;
        };

        let column = match columns.iter().position(|v| *v == record.task_name) {
            Some(column) => column,
            None => {
                columns.push(record.task_name.clone());
                cells.iter_mut().for_each(|row| row.push(0));
                columns.len() - 1
            }
        };
        trace!("{} {}s into {}", record.task_name, record.duration_seconds, rows[row]);
        cells[row][column] += record.duration_seconds;
    }

    Ok(AggregatedTable {
        kind: boundary.kind,
        rows,
        columns,
        cells,
    })
}

fn week_days() -> impl Iterator<Item = Weekday> {
    std::iter::successors(Some(Weekday::Mon), |day| {
        (*day != Weekday::Sun).then(|| day.succ())
    })
}
