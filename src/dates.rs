//! Date parsing and window arithmetic
//!
//! Date-named columns carry free-text date values; this module is the
//! parsing collaborator that turns them into `NaiveDateTime` and applies
//! `delta` window arithmetic during normalization. Unparseable input is a
//! [`QueryError::MalformedQuery`].

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::{QueryError, Result};
use crate::ir::DeltaUnit;

/// Render format for date values inside generated SQL.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

/// Parse a free-text date. Date-only forms resolve to midnight.
pub fn parse_date(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(parsed);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            // Midnight always exists for a valid date
            return Ok(parsed.and_hms_opt(0, 0, 0).unwrap());
        }
    }

    Err(QueryError::MalformedQuery(format!(
        "unparseable date '{text}'"
    )))
}

/// Offset a date by `delta` in the given units. Years are 365-day spans.
pub fn apply_delta(date: NaiveDateTime, delta: i64, units: DeltaUnit) -> Result<NaiveDateTime> {
    let span = match units {
        DeltaUnit::Days => Duration::days(delta),
        DeltaUnit::Hours => Duration::hours(delta),
        DeltaUnit::Minutes => Duration::minutes(delta),
        DeltaUnit::Seconds => Duration::seconds(delta),
        DeltaUnit::Years => Duration::days(delta.saturating_mul(365)),
    };
    date.checked_add_signed(span)
        .ok_or_else(|| QueryError::MalformedQuery(format!("date window overflow: delta {delta}")))
}
