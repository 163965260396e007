//! Canonical vote timestamps
//!
//! Vote services report times as epoch seconds, epoch milliseconds or a
//! date-time string. Everything is stored as local `YYYY-MM-DD HH:MM:SS`.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use crate::{Error, Result};

/// Storage format of vote timestamps
pub const VOTE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert a raw vote timestamp into the canonical storage form.
///
/// All-digit input is epoch seconds, or epoch milliseconds when it has 13
/// digits. Already canonical strings pass through; RFC 3339 strings are
/// converted to local time.
pub fn normalize_vote_timestamp(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidTimestamp("empty timestamp".to_string()));
    }

    if raw.bytes().all(|b| b.is_ascii_digit()) {
        let mut epoch: i64 = raw
            .parse()
            .map_err(|e| Error::InvalidTimestamp(format!("{}: {}", raw, e)))?;
        if raw.len() == 13 {
            epoch /= 1000;
        }
        return format_epoch_seconds(epoch);
    }

    if NaiveDateTime::parse_from_str(raw, VOTE_TIME_FORMAT).is_ok() {
        return Ok(raw.to_string());
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Local).format(VOTE_TIME_FORMAT).to_string());
    }

    Err(Error::InvalidTimestamp(format!(
        "unrecognised timestamp format: {}",
        raw
    )))
}

/// Format epoch seconds as a local canonical timestamp
pub fn format_epoch_seconds(epoch_seconds: i64) -> Result<String> {
    Local
        .timestamp_opt(epoch_seconds, 0)
        .single()
        .map(|dt| dt.format(VOTE_TIME_FORMAT).to_string())
        .ok_or_else(|| Error::InvalidTimestamp(format!("out of range: {}", epoch_seconds)))
}

/// Format epoch milliseconds as a local canonical timestamp
pub fn format_epoch_millis(epoch_millis: i64) -> Result<String> {
    format_epoch_seconds(epoch_millis.div_euclid(1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_local(epoch_seconds: i64) -> String {
        Local
            .timestamp_opt(epoch_seconds, 0)
            .unwrap()
            .format(VOTE_TIME_FORMAT)
            .to_string()
    }

    #[test]
    fn test_epoch_seconds() {
        let normalized = normalize_vote_timestamp("1700000000").unwrap();
        assert_eq!(normalized, expected_local(1_700_000_000));
    }

    #[test]
    fn test_epoch_millis_matches_seconds() {
        let from_millis = normalize_vote_timestamp("1700000000123").unwrap();
        let from_seconds = normalize_vote_timestamp("1700000000").unwrap();
        assert_eq!(from_millis, from_seconds);
    }

    #[test]
    fn test_canonical_passthrough() {
        let normalized = normalize_vote_timestamp(" 2024-03-01 12:30:00 ").unwrap();
        assert_eq!(normalized, "2024-03-01 12:30:00");
    }

    #[test]
    fn test_rfc3339_is_converted() {
        let normalized = normalize_vote_timestamp("2023-11-14T22:13:20Z").unwrap();
        assert_eq!(normalized, expected_local(1_700_000_000));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            normalize_vote_timestamp("yesterday"),
            Err(Error::InvalidTimestamp(_))
        ));
        assert!(matches!(
            normalize_vote_timestamp(""),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_format_epoch_millis() {
        assert_eq!(
            format_epoch_millis(1_700_000_000_999).unwrap(),
            expected_local(1_700_000_000)
        );
    }
}
