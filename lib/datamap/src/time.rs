use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::value::parse_integer;

// Temporal field handling
//
// Values are accepted as unix timestamps or as loosely formatted strings and
// are always stored in the canonical pattern of their sub-type. Relational
// stores that allow it use an all-zero date as "no date"; that sentinel can't
// be converted to a timestamp so it is recognised before parsing.

/// Sub-type of a temporal field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Temporal {
    DateTime,
    Date,
    Time,
}

impl Temporal {
    pub(crate) fn pattern(self) -> &'static str {
        match self {
            Temporal::DateTime => "%Y-%m-%d %H:%M:%S",
            Temporal::Date => "%Y-%m-%d",
            Temporal::Time => "%H:%M:%S",
        }
    }

    pub(crate) fn zero(self) -> &'static str {
        match self {
            Temporal::DateTime => "0000-00-00 00:00:00",
            Temporal::Date => "0000-00-00",
            Temporal::Time => "00:00:00",
        }
    }

    pub(crate) fn format(self, dt: &NaiveDateTime) -> String {
        dt.format(self.pattern()).to_string()
    }
}

pub(crate) fn is_zero_date(s: &str) -> bool {
    s.trim_start().starts_with("0000-00-00")
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d %B %Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%B %d, %Y", "%d %b %Y"];

const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M:%S%.f", "%H:%M"];

/// Convert a unix timestamp to a UTC wall-clock time.
pub(crate) fn from_epoch(seconds: i64) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp(seconds, 0).map(|dt| dt.naive_utc())
}

/// Parse a timestamp from a numeric epoch or a date/time string.
///
/// Times without a date are taken to be today (UTC); dates without a time
/// are taken to be midnight. Offsets in RFC 3339 strings are normalised to UTC.
pub(crate) fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(epoch) = parse_integer(s) {
        return from_epoch(epoch);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }

    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    {
        return Some(dt);
    }

    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
    {
        return date.and_hms_opt(0, 0, 0);
    }

    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(s, f).ok())
        .map(|time| Utc::now().date_naive().and_time(time))
}
