/// Types and utilities for manipulating timestamps.
///
/// All timestamps in the data model are UTC.  The monitoring tools we ingest
/// mostly emit zone-less local stamps; those are resolved against a
/// caller-supplied fixed UTC offset, never against the platform zone, so that
/// a file parses the same way everywhere.
use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

pub type Timestamp = DateTime<Utc>;

pub fn epoch() -> Timestamp {
    Utc.timestamp_opt(0, 0).unwrap()
}

pub fn now() -> Timestamp {
    Utc::now()
}

pub fn far_future() -> Timestamp {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
}

pub fn timestamp_from_ymdhms(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Timestamp {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .unwrap()
}

/// Parse a timestamp with a UTC offset, eg "2023-06-21T13:32:25+02:00" or
/// "2023-06-21T13:32:25Z".

pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(t) => Ok(t.with_timezone(&Utc)),
        Err(e) => bail!("Invalid RFC3339 timestamp {s}: {e}"),
    }
}

/// Resolve a zone-less local date-time against `offset`.  Fixed offsets have
/// no DST gaps, so the resolution is always unique.

pub fn localize(local: NaiveDateTime, offset: FixedOffset) -> Timestamp {
    match offset.from_local_datetime(&local).single() {
        Some(t) => t.with_timezone(&Utc),
        // Unreachable for a fixed offset, but don't panic on principle.
        None => Utc.from_utc_datetime(&local),
    }
}

/// Try `formats` in order against `s` (a zone-less local stamp) and resolve
/// the first match against `offset`.  The fixed order matters: several of the
/// source formats are ambiguous between each other and the caller encodes its
/// preference in the ordering.

pub fn parse_local_fallback(
    s: &str,
    formats: &[&str],
    offset: FixedOffset,
) -> Result<Timestamp> {
    for fmt in formats {
        if let Ok(local) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(localize(local, offset));
        }
    }
    bail!("Unrecognized timestamp {s}")
}

pub fn add_seconds(t: Timestamp, secs: i64) -> Timestamp {
    t + chrono::Duration::seconds(secs)
}

#[test]
fn test_parse_timestamp() {
    let t = parse_timestamp("2023-06-21T13:32:25+02:00").unwrap();
    assert!(t == timestamp_from_ymdhms(2023, 6, 21, 11, 32, 25));
    let t = parse_timestamp("2023-06-21T13:32:25Z").unwrap();
    assert!(t == timestamp_from_ymdhms(2023, 6, 21, 13, 32, 25));
    assert!(parse_timestamp("2023-06-21 13:32:25").is_err());
}

#[test]
fn test_parse_local_fallback() {
    let plus2 = FixedOffset::east_opt(2 * 3600).unwrap();
    let formats = &["%m/%d/%Y %I:%M:%S %p", "%m/%d/%y %H:%M:%S"];
    let t = parse_local_fallback("07/12/2013 09:30:01 AM", formats, plus2).unwrap();
    assert!(t == timestamp_from_ymdhms(2013, 7, 12, 7, 30, 1));
    let t = parse_local_fallback("07/12/13 21:30:01", formats, plus2).unwrap();
    assert!(t == timestamp_from_ymdhms(2013, 7, 12, 19, 30, 1));
    assert!(parse_local_fallback("yesterday", formats, plus2).is_err());
}

#[test]
fn test_add_seconds() {
    let t = timestamp_from_ymdhms(2013, 7, 12, 23, 59, 30);
    assert!(add_seconds(t, 60) == timestamp_from_ymdhms(2013, 7, 13, 0, 0, 30));
}
