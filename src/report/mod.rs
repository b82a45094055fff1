//! Summaries of recorded time over calendar periods.

use chrono::{NaiveDate, TimeZone};
use tracing::debug;

use crate::{
    error::TrackerError,
    storage::{RecordQuery, Storage},
};

use aggregate::{aggregate, AggregatedTable};
use period::{resolve, PeriodKind};

pub mod aggregate;
pub mod period;

/// Loads the records of the `kind` period containing `reference` and aggregates them.
pub fn build_report<Tz: TimeZone>(
    storage: &dyn Storage,
    kind: PeriodKind,
    reference: NaiveDate,
    tz: &Tz,
) -> Result<AggregatedTable, TrackerError> {
    let boundary = resolve(kind, reference)?;
    let (from, before) = boundary.instants(tz);
    let records = storage.get_records(&RecordQuery::started_between(from, before))?;
    debug!(
        "Aggregating {} records of {kind} {} - {}",
        records.len(),
        boundary.start,
        boundary.end
    );
    aggregate(records.iter().map(|v| &v.record), &boundary, tz)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    use crate::storage::{sqlite::SqliteStorage, DurableRecord, NewTask, Storage};

    use super::{build_report, period::PeriodKind};

    #[test]
    fn test_report_from_storage() -> Result<()> {
        let mut storage = SqliteStorage::open_in_memory()?;
        for (task, day, seconds) in [("A", 1, 3600), ("B", 3, 1800), ("A", 8, 60)] {
            let start = Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap();
            let record = DurableRecord::new(task, start, start + Duration::seconds(seconds))?;
            storage.add_record(&NewTask::named(task), &record)?;
        }

        let reference = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let table = build_report(&storage, PeriodKind::Week, reference, &Utc)?;
        assert_eq!(table.columns, ["A", "B"]);
        assert_eq!(table.cell("Mon", "A"), Some(3600));
        assert_eq!(table.cell("Wed", "B"), Some(1800));
        assert_eq!(table.total(), 5400);

        let table = build_report(&storage, PeriodKind::Month, reference, &Utc)?;
        assert_eq!(table.column_totals(), vec![3660, 1800]);

        let empty = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        assert!(build_report(&storage, PeriodKind::Day, empty, &Utc)?.is_empty());
        Ok(())
    }
}
