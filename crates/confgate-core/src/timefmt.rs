//! Timestamp normalization.
//!
//! Persisted records carry timestamps in whatever rendering the upstream
//! system used at write time. The API boundary normalizes all of them to
//! one ISO-8601 form with millisecond precision, preserving the source
//! offset (`Z` when the source was UTC).

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tracing::warn;

/// Normalize a persisted timestamp to ISO-8601.
///
/// Accepts RFC 3339, `2017-04-05 04:47:36.462-07:00`,
/// `2017-04-05 04:47:36.462 +0000 UTC`, and the bare
/// `2017-06-22 16:41:02.334` rendering (taken as UTC). Empty input stays
/// empty; anything unrecognized is passed through unchanged with a warning.
pub fn to_iso8601(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match parse_any(trimmed) {
        Some(dt) => render(dt),
        None => {
            warn!(%raw, "unrecognized timestamp rendering, passing through");
            raw.to_string()
        }
    }
}

fn parse_any(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt);
    }
    // Go's default rendering ends with a zone name after the numeric
    // offset; the name repeats what the offset already says, so drop it.
    if let Some((head, zone)) = s.rsplit_once(' ') {
        if !zone.is_empty() && zone.chars().all(|c| c.is_ascii_alphabetic()) {
            if let Ok(dt) = DateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S%.f %z") {
                return Some(dt);
            }
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    None
}

fn render(dt: DateTime<FixedOffset>) -> String {
    if dt.offset().local_minus_utc() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string()
    }
}
