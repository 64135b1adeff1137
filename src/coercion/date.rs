//! Date normalization
//!
//! Timestamps arrive in whatever form the source file used. A [`DateNormalizer`]
//! turns them into ISO-8601 text before TIMESTAMP coercion; the same parser
//! folds stored and incoming timestamps into one form for duplicate checks.

use crate::models::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Canonical output format for normalized timestamps
pub const ISO_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

const DAY_FIRST_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

const MONTH_FIRST_FORMATS: &[&str] = &["%m/%d/%Y", "%m-%d-%Y"];

/// Converts raw date/time values into ISO-8601 text
pub trait DateNormalizer: Send + Sync {
    /// Normalize a value, or `None` when it is not recognised as a date
    fn normalize_date(&self, value: &Value) -> Option<String>;
}

/// Normalizer for the common spreadsheet and export formats
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoDateNormalizer {
    /// Read ambiguous `01/02/2024` as 1 February rather than 2 January
    pub day_first: bool,
}

impl IsoDateNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn day_first() -> Self {
        Self { day_first: true }
    }
}

impl DateNormalizer for IsoDateNormalizer {
    fn normalize_date(&self, value: &Value) -> Option<String> {
        let text = value.as_str()?;
        parse_timestamp(text, self.day_first).map(|ts| ts.format(ISO_TIMESTAMP_FORMAT).to_string())
    }
}

/// Parse date or date-time text into a naive timestamp
///
/// Offsets in RFC 3339 input are converted to UTC. Date-only input is taken
/// as midnight.
pub fn parse_timestamp(text: &str, day_first: bool) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    // Stores render zoned timestamps as "2024-01-01 00:00:00+00"
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.naive_utc());
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }

    let ambiguous = if day_first {
        [DAY_FIRST_FORMATS, MONTH_FIRST_FORMATS]
    } else {
        [MONTH_FIRST_FORMATS, DAY_FIRST_FORMATS]
    };
    DATE_FORMATS
        .iter()
        .chain(ambiguous.iter().flat_map(|formats| formats.iter()))
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(raw: &str) -> Option<String> {
        IsoDateNormalizer::new().normalize_date(&Value::from(raw))
    }

    #[test]
    fn test_iso_forms() {
        assert_eq!(normalize("2024-03-01").as_deref(), Some("2024-03-01T00:00:00"));
        assert_eq!(
            normalize("2024-03-01 12:30:00").as_deref(),
            Some("2024-03-01T12:30:00")
        );
        assert_eq!(
            normalize("2024-03-01T12:30:00.250").as_deref(),
            Some("2024-03-01T12:30:00.250")
        );
    }

    #[test]
    fn test_rfc3339_offset_converted_to_utc() {
        assert_eq!(
            normalize("2024-03-01T12:00:00+02:00").as_deref(),
            Some("2024-03-01T10:00:00")
        );
        assert_eq!(
            parse_timestamp("2024-03-01 12:00:00+00", false),
            parse_timestamp("2024-03-01T12:00:00", false)
        );
    }

    #[test]
    fn test_ambiguous_dates_follow_day_first() {
        assert_eq!(normalize("02/01/2024").as_deref(), Some("2024-02-01T00:00:00"));
        let day_first = IsoDateNormalizer::day_first();
        assert_eq!(
            day_first.normalize_date(&Value::from("02/01/2024")).as_deref(),
            Some("2024-01-02T00:00:00")
        );
        // unambiguous either way
        assert_eq!(
            day_first.normalize_date(&Value::from("25/12/2024")).as_deref(),
            Some("2024-12-25T00:00:00")
        );
    }

    #[test]
    fn test_unrecognised_input() {
        assert_eq!(normalize("next tuesday"), None);
        assert_eq!(IsoDateNormalizer::new().normalize_date(&Value::Int(5)), None);
    }
}
