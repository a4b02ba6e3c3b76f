//! Date literal parsing and formatting.
//!
//! Dates are carried as epoch milliseconds in UTC. Accepted text forms are
//! `yyyy-MM-dd`, `yyyy-MM-dd HH:mm:ss`, `yyyy-MM-ddTHH:mm:ss`, the same with a
//! numeric `+hhmm` offset, and RFC 3339.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::types::{Result, SombraError};

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Parses a date or date-time literal into epoch milliseconds.
pub fn parse_date(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(date) = Date::parse(text, format_description!("[year]-[month]-[day]")) {
        return Ok(to_millis(date.midnight().assume_utc()));
    }
    if let Ok(dt) = PrimitiveDateTime::parse(
        text,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Ok(to_millis(dt.assume_utc()));
    }
    if let Ok(dt) = PrimitiveDateTime::parse(
        text,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ) {
        return Ok(to_millis(dt.assume_utc()));
    }
    if let Ok(dt) = OffsetDateTime::parse(
        text,
        format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
        ),
    ) {
        return Ok(to_millis(dt));
    }
    OffsetDateTime::parse(text, &Rfc3339)
        .map(to_millis)
        .map_err(|err| SombraError::Parse(format!("invalid date literal '{text}': {err}")))
}

/// Formats epoch milliseconds as `yyyy-MM-dd`, or `yyyy-MM-dd HH:mm:ss` when the
/// instant is not a UTC midnight.
pub fn format_date(millis: i64) -> String {
    let Ok(dt) = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
    else {
        return millis.to_string();
    };
    let date = format!(
        "{:04}-{:02}-{:02}",
        dt.year(),
        u8::from(dt.month()),
        dt.day()
    );
    if (dt.hour(), dt.minute(), dt.second(), dt.millisecond()) == (0, 0, 0, 0) {
        date
    } else {
        format!(
            "{date} {:02}:{:02}:{:02}",
            dt.hour(),
            dt.minute(),
            dt.second()
        )
    }
}

fn to_millis(dt: OffsetDateTime) -> i64 {
    (dt.unix_timestamp_nanos().div_euclid(NANOS_PER_MILLI)) as i64
}
