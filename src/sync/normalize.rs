//! Normalization of loosely-typed remote fields into stored shapes.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

use crate::db::PostState;

/// Derive a post's single state from the remote's independent flags.
///
/// Ordered rule list, first true flag wins; flags are never combined.
#[must_use]
pub fn derive_state(is_delete: i64, is_complaint: i64, choose: i64, hot: i64) -> PostState {
    let rules = [
        (is_delete != 0, PostState::Deleted),
        (is_complaint != 0, PostState::Complaint),
        (choose != 0, PostState::Chosen),
        (hot != 0, PostState::Hot),
    ];

    rules
        .iter()
        .find(|(flag, _)| *flag)
        .map_or(PostState::Normal, |(_, state)| *state)
}

/// Clean the remote image field into a JSON array of URLs.
///
/// The remote stores comma-joined URLs and sometimes literal
/// `[object Object]` artifacts from its own frontend.
#[must_use]
pub fn clean_image_list(raw: &str) -> String {
    if raw.is_empty() || raw == "[]" || raw == "[object Object]" {
        return "[]".to_string();
    }

    let cleaned: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != "[object Object]")
        .collect();

    serde_json::to_string(&cleaned).unwrap_or_else(|_| "[]".to_string())
}

const REMOTE_TIME_FORMATS: &[&str] = &["%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse one of the remote's loose timestamp shapes, falling back to now.
#[must_use]
pub fn parse_remote_time(raw: &str) -> DateTime<Utc> {
    let trimmed = raw.trim();

    for format in REMOTE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return naive.and_utc();
        }
    }

    // Month-day shorthand carries no year; assume the current one.
    let with_year = format!("{}-{trimmed}", Utc::now().year());
    if let Ok(naive) = NaiveDateTime::parse_from_str(&with_year, "%Y-%m-%d %H:%M") {
        return naive.and_utc();
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return naive.and_utc();
        }
    }

    if !trimmed.is_empty() {
        warn!(raw = %raw, "Failed to parse remote timestamp, using now");
    }
    Utc::now()
}

/// Serialize a timestamp for storage.
#[must_use]
pub fn to_stored_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// Parse a stored timestamp (RFC 3339, or SQLite's `datetime('now')` shape).
#[must_use]
pub fn parse_stored_time(stored: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(stored) {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(stored, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format a stored timestamp the way the remote write API expects.
#[must_use]
pub fn format_for_remote(stored: &str) -> String {
    parse_stored_time(stored)
        .unwrap_or_else(Utc::now)
        .format("%Y/%m/%d %H:%M:%S")
        .to_string()
}
