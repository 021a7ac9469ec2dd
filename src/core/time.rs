//! Timestamp helpers for persisted records.
//!
//! Records store RFC 3339 UTC timestamps with millisecond precision
//! (`2026-10-15T09:30:00.123Z`); the poll ledger stores epoch milliseconds.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a persisted timestamp; anything unparseable is `None`.
pub fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn epoch_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}
