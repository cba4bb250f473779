//! Formatting and timestamp helpers shared by the pipeline and the server.

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 transcript timestamp.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Milliseconds since the epoch for a transcript timestamp.
pub fn timestamp_millis(ts: &str) -> Option<i64> {
    parse_timestamp(ts).map(|dt| dt.timestamp_millis())
}

/// Milliseconds between two timestamps, if both parse and end is not before start.
pub fn duration_millis(start: &str, end: &str) -> Option<i64> {
    let start = timestamp_millis(start)?;
    let end = timestamp_millis(end)?;
    (end >= start).then_some(end - start)
}

/// Format a duration as a compact label (e.g., "1h 05m", "3m 12s", "45s").
pub fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Short label for an opaque agent id.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(7) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(45_900), "45s");
        assert_eq!(format_duration(192_000), "3m 12s");
        assert_eq!(format_duration(3_900_000), "1h 05m");
        assert_eq!(format_duration(-5), "0s");
    }

    #[test]
    fn test_duration_millis() {
        assert_eq!(
            duration_millis("2026-02-23T00:00:00Z", "2026-02-23T00:01:30.500Z"),
            Some(90_500)
        );
        assert_eq!(
            duration_millis("2026-02-23T00:01:00Z", "2026-02-23T00:00:00Z"),
            None
        );
        assert_eq!(duration_millis("nope", "2026-02-23T00:00:00Z"), None);
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("🙂🙂🙂", 2).chars().count(), 2);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("a4f21c7e9b"), "a4f21c7");
        assert_eq!(short_id("abc"), "abc");
    }
}
