//! Timestamp Parsing
//!
//! Record stores hand back timestamps in several shapes. Everything is
//! normalised to `DateTime<Utc>` here.
//!
//! # Example
//!
//! ```
//! use ties_events::parse_timestamp;
//!
//! let ts = parse_timestamp("2025-06-01T12:30:00.000Z").unwrap();
//! assert_eq!(ts.to_rfc3339(), "2025-06-01T12:30:00+00:00");
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Error type for timestamps that match none of the accepted formats.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid timestamp: '{0}', expected RFC 3339 or 'YYYY-MM-DD[THH:MM:SS]'")]
pub struct ParseTimestampError(pub String);

/// Parses a timestamp string.
///
/// Accepts RFC 3339 (with offset or `Z`), naive `YYYY-MM-DDTHH:MM:SS[.fff]`
/// (taken as UTC), the same with a space separator, and bare dates (midnight
/// UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseTimestampError> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ParseTimestampError(raw.to_string()))
}

/// Serde helper: an optional timestamp field that tolerates junk.
///
/// Absent, null, empty or unparseable values all become `None`.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| parse_timestamp(&s).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339_zulu() {
        let ts = parse_timestamp("2025-06-01T12:30:00.000Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_rfc3339_offset() {
        let ts = parse_timestamp("2025-06-01T14:30:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_is_utc() {
        let ts = parse_timestamp("2025-06-01T12:30:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap());

        let spaced = parse_timestamp("2025-06-01 12:30:00").unwrap();
        assert_eq!(spaced, ts);
    }

    #[test]
    fn test_parse_bare_date() {
        let ts = parse_timestamp("2025-06-01").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_error() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("2025-13-01").is_err());
    }

    #[test]
    fn test_lenient_deserialize() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(default, deserialize_with = "deserialize_lenient")]
            at: Option<DateTime<Utc>>,
        }

        let ok: Row = serde_json::from_str(r#"{"at":"2025-06-01"}"#).unwrap();
        assert!(ok.at.is_some());

        let junk: Row = serde_json::from_str(r#"{"at":"not a date"}"#).unwrap();
        assert!(junk.at.is_none());

        let missing: Row = serde_json::from_str("{}").unwrap();
        assert!(missing.at.is_none());

        let null: Row = serde_json::from_str(r#"{"at":null}"#).unwrap();
        assert!(null.at.is_none());
    }
}
