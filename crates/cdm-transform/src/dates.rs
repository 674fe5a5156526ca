//! Date parsing for extract timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Parses the date part of an extract value.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps such as
/// `2020-01-01T10:00:00Z`, and naive `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.date_naive());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|timestamp| timestamp.date())
}

/// Outcome of reading an optional date column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Missing,
    Valid(NaiveDate),
    Invalid,
}

impl DateField {
    pub fn read(value: &str) -> Self {
        if value.trim().is_empty() {
            return Self::Missing;
        }
        parse_date(value).map_or(Self::Invalid, Self::Valid)
    }

    pub fn date(self) -> Option<NaiveDate> {
        match self {
            Self::Valid(date) => Some(date),
            Self::Missing | Self::Invalid => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_extract_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 2);
        assert_eq!(parse_date("2020-01-02"), expected);
        assert_eq!(parse_date("2020-01-02T23:59:00Z"), expected);
        assert_eq!(parse_date("2020-01-02T08:00:00"), expected);
        assert_eq!(parse_date("02/01/2020"), None);
        assert_eq!(parse_date("2020-02-30"), None);
    }

    #[test]
    fn optional_dates() {
        assert_eq!(DateField::read(""), DateField::Missing);
        assert_eq!(DateField::read("soon"), DateField::Invalid);
        assert!(DateField::read("1999-12-31").date().is_some());
    }
}
