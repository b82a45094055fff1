use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, SubsecRound, TimeZone, Utc};

/// Sub-second digits kept by [format_timestamp].
const STORED_SUBSEC_DIGITS: u16 = 6;

/// This is the standard way of converting a timestamp to a string in tasktally. It's fixed width,
/// always UTC and locale independent, so string order matches time order.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Drops the precision [format_timestamp] can't represent, so a value survives being written
/// and read back unchanged.
pub fn stored_precision(time: DateTime<Utc>) -> DateTime<Utc> {
    time.trunc_subsecs(STORED_SUBSEC_DIGITS)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value.trim()).map(|v| v.with_timezone(&Utc))
}

/// Formats seconds as `HH:MM:SS`. Hours are not wrapped, so 25 hours is `25:00:00`.
pub fn format_hms(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let seconds = seconds.unsigned_abs();
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
}

/// Returns the first instant of `date` in `tz`. When midnight doesn't exist because of a DST
/// transition the date is taken as if it were UTC midnight.
pub fn day_start<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
}
