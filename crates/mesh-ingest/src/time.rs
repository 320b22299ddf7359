//! UTC clock helpers shared by the gateway and the sample normalizer.

use chrono::{Datelike, DateTime, TimeZone, Utc};

/// Current UTC epoch timestamp, second resolution (matches the original's
/// `utcepochnow()`, which truncates to whole seconds).
pub fn utc_epoch_now() -> i64 {
    Utc::now().timestamp()
}

/// Current UTC epoch timestamp with sub-second resolution, for tunables
/// measured in fractional seconds (`batch_at`, `throttle_delay`).
pub fn utc_epoch_now_f64() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

/// 06:00 UTC of the given day. The gateway samples this once at process
/// startup and reuses it for the remainder of the run — this is the
/// deliberate flat "sunrise" constant, not a geographic calculation.
pub fn sunrise_of(day: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(day.year(), day.month(), day.day(), 6, 0, 0)
        .single()
        .expect("valid calendar date always has a unique 06:00 UTC instant")
}

/// Clamp `now - sunrise`, in seconds, to `[_, 0xFFFE]`. Negative offsets
/// (clock skew, or a sample timestamped before today's 06:00 mark) are
/// logged but not rejected — they wrap through the unsigned cast, matching
/// the original's permissive one-sided clamp.
pub fn seconds_since_sunrise(now: DateTime<Utc>, sunrise: DateTime<Utc>) -> u16 {
    let delta = (now - sunrise).num_seconds();
    if delta < 0 {
        tracing::warn!(delta, "sample timestamp precedes today's sunrise mark");
    }
    delta.min(0xFFFE) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};

    #[test]
    fn sunrise_is_six_am_utc_on_the_given_day() {
        let day = Utc.with_ymd_and_hms(2026, 3, 15, 18, 42, 0).single().unwrap();
        let sunrise = sunrise_of(day);
        assert_eq!(sunrise.hour(), 6);
        assert_eq!(sunrise.minute(), 0);
        assert_eq!(sunrise.day(), 15);
    }

    #[test]
    fn seconds_since_sunrise_clamps_at_0xfffe() {
        let sunrise = Utc.with_ymd_and_hms(2026, 3, 15, 6, 0, 0).single().unwrap();
        let far_future = sunrise + Duration::seconds(100_000);
        assert_eq!(seconds_since_sunrise(far_future, sunrise), 0xFFFE);
    }

    #[test]
    fn seconds_since_sunrise_is_exact_below_the_clamp() {
        let sunrise = Utc.with_ymd_and_hms(2026, 3, 15, 6, 0, 0).single().unwrap();
        let later = sunrise + Duration::seconds(120);
        assert_eq!(seconds_since_sunrise(later, sunrise), 120);
    }
}
