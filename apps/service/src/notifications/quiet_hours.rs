use chrono::{DateTime, NaiveTime, Utc};

use crate::clock::resolve_timezone;
use crate::models::QuietHours;

/// Whether `time` falls inside the local window `start..end`
///
/// Windows may wrap past midnight; equal bounds mean the whole day.
pub fn contains(start: NaiveTime, end: NaiveTime, time: NaiveTime) -> bool {
    if start == end {
        true
    } else if start < end {
        start <= time && time < end
    } else {
        time >= start || time < end
    }
}

/// Whether a channel's quiet hours apply at `at`
pub fn is_quiet(quiet: &QuietHours, at: DateTime<Utc>) -> bool {
    let tz = resolve_timezone(Some(&quiet.timezone));
    contains(quiet.start, quiet.end, at.with_timezone(&tz).time())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn daytime_window() {
        assert!(contains(t(9, 0), t(17, 0), t(9, 0)));
        assert!(contains(t(9, 0), t(17, 0), t(12, 30)));
        assert!(!contains(t(9, 0), t(17, 0), t(17, 0)));
        assert!(!contains(t(9, 0), t(17, 0), t(8, 59)));
    }

    #[test]
    fn overnight_window_wraps() {
        assert!(contains(t(22, 0), t(6, 0), t(23, 0)));
        assert!(contains(t(22, 0), t(6, 0), t(2, 0)));
        assert!(!contains(t(22, 0), t(6, 0), t(6, 0)));
        assert!(!contains(t(22, 0), t(6, 0), t(12, 0)));
    }

    #[test]
    fn equal_bounds_are_always_quiet() {
        assert!(contains(t(0, 0), t(0, 0), t(13, 37)));
    }

    #[test]
    fn evaluated_in_channel_timezone() {
        let quiet = QuietHours { start: t(22, 0), end: t(7, 0), timezone: "Asia/Tokyo".to_string() };
        // 14:00 UTC is 23:00 in Tokyo
        let at = DateTime::parse_from_rfc3339("2024-03-01T14:00:00Z").unwrap().with_timezone(&Utc);
        assert!(is_quiet(&quiet, at));
        // 03:00 UTC is 12:00 in Tokyo
        let at = DateTime::parse_from_rfc3339("2024-03-01T03:00:00Z").unwrap().with_timezone(&Utc);
        assert!(!is_quiet(&quiet, at));
    }
}
