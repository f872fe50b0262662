//! Time Codec
//!
//! Converts between display timestamps (`MM:SS`, `HH:MM:SS`) and milliseconds.
//! Parsing never fails: malformed input maps to zero.

use crate::TimeMs;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Formats a number of seconds as `MM:SS`, or `HH:MM:SS` from one hour up.
///
/// The value is rounded to the nearest whole second. Hours are not wrapped.
/// Negative and non-finite inputs render as `00:00`.
pub fn format_seconds(total_seconds: f64) -> String {
    if !total_seconds.is_finite() || total_seconds <= 0.0 {
        return format_whole_seconds(0);
    }
    format_whole_seconds(total_seconds.round() as u64)
}

/// Formats a nanosecond count, truncating to whole seconds.
pub fn format_nanos(total_nanos: u64) -> String {
    format_whole_seconds(total_nanos / NANOS_PER_SECOND)
}

/// Formats a millisecond count, rounding to the nearest second.
pub fn format_millis(ms: TimeMs) -> String {
    format_whole_seconds(ms.saturating_add(500) / 1000)
}

fn format_whole_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Parses `MM:SS` or `HH:MM:SS` into milliseconds.
///
/// Anything that does not split into two or three numeric fields yields 0.
pub fn parse_to_ms(text: &str) -> TimeMs {
    let fields: Vec<&str> = text.trim().split(':').collect();
    let mut numbers = Vec::with_capacity(fields.len());
    for field in &fields {
        match parse_field(field) {
            Some(n) => numbers.push(n),
            None => return 0,
        }
    }

    let (hours, minutes, seconds) = match numbers.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return 0,
    };

    hours
        .saturating_mul(3_600_000)
        .saturating_add(minutes.saturating_mul(60_000))
        .saturating_add(seconds.saturating_mul(1_000))
}

fn parse_field(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0.0), "00:00");
        assert_eq!(format_seconds(59.0), "00:59");
        assert_eq!(format_seconds(60.0), "01:00");
        assert_eq!(format_seconds(3599.0), "59:59");
        assert_eq!(format_seconds(3600.0), "01:00:00");
        assert_eq!(format_seconds(359_999.0), "99:59:59");
        assert_eq!(format_seconds(360_000.0), "100:00:00");
    }

    #[test]
    fn test_format_seconds_rounds() {
        assert_eq!(format_seconds(59.4), "00:59");
        assert_eq!(format_seconds(59.6), "01:00");
        assert_eq!(format_seconds(-3.0), "00:00");
        assert_eq!(format_seconds(f64::NAN), "00:00");
    }

    #[test]
    fn test_format_nanos() {
        assert_eq!(format_nanos(0), "00:00");
        assert_eq!(format_nanos(1_999_999_999), "00:01");
        assert_eq!(format_nanos(3_661 * NANOS_PER_SECOND), "01:01:01");
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(61_000), "01:01");
        assert_eq!(format_millis(499), "00:00");
        assert_eq!(format_millis(u64::MAX), "5124095576030:25:51");
    }

    #[test]
    fn test_parse_to_ms() {
        assert_eq!(parse_to_ms("00:00"), 0);
        assert_eq!(parse_to_ms("01:01"), 61_000);
        assert_eq!(parse_to_ms("01:00:00"), 3_600_000);
        assert_eq!(parse_to_ms("invalid"), 0);
        assert_eq!(parse_to_ms(""), 0);
        assert_eq!(parse_to_ms("::"), 0);
        assert_eq!(parse_to_ms("1:2:3:4"), 0);
        assert_eq!(parse_to_ms("aa:10"), 0);
        assert_eq!(parse_to_ms("-1:10"), 0);
    }

    #[test]
    fn test_roundtrip_within_one_second() {
        for seconds in [0u64, 1, 59, 60, 61, 3599, 3600, 3601, 3661] {
            let parsed = parse_to_ms(&format_seconds(seconds as f64));
            let expected = seconds * 1000;
            assert!(
                parsed.abs_diff(expected) <= 1000,
                "roundtrip of {}s gave {}ms",
                seconds,
                parsed
            );
        }
    }
}
