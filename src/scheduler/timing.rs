//! Frame-accurate timing helpers.

use chrono::NaiveTime;

/// Seconds in one broadcast day.
pub const DAY_SECONDS: f64 = 86_400.0;

/// NTSC frame rate of the channel.
pub const FRAME_RATE: f64 = 29.976;

/// One frame, inserted between adjacent items so start times stay
/// frame-accurate (~33.367 ms).
pub const FRAME_GAP_SECONDS: f64 = 1.0 / FRAME_RATE;

/// Convert an offset in seconds from schedule start to a time of day with
/// microsecond resolution, wrapping at the 24-hour boundary.
pub fn time_of_day(total_seconds: f64) -> NaiveTime {
    let time_in_day = total_seconds.rem_euclid(DAY_SECONDS);
    let hours = (time_in_day / 3600.0) as u32;
    let minutes = ((time_in_day % 3600.0) / 60.0) as u32;
    let seconds_total = time_in_day % 60.0;
    let seconds = seconds_total as u32;
    let microseconds = ((seconds_total - seconds as f64) * 1_000_000.0) as u32;
    NaiveTime::from_hms_micro_opt(hours, minutes, seconds, microseconds)
        .unwrap_or(NaiveTime::MIN)
}

/// Which day of a multi-day schedule an offset falls in (0-based).
pub fn day_offset(total_seconds: f64) -> u32 {
    (total_seconds / DAY_SECONDS) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_gap_value() {
        assert!((FRAME_GAP_SECONDS - 0.033367).abs() < 1e-4);
    }

    #[test]
    fn test_time_of_day_midnight() {
        assert_eq!(time_of_day(0.0), NaiveTime::from_hms_micro_opt(0, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_time_of_day_microseconds() {
        let t = time_of_day(3661.5);
        assert_eq!(t, NaiveTime::from_hms_micro_opt(1, 1, 1, 500_000).unwrap());
    }

    #[test]
    fn test_time_of_day_wraps_at_midnight() {
        let t = time_of_day(DAY_SECONDS + 60.0);
        assert_eq!(t, NaiveTime::from_hms_micro_opt(0, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_day_offset() {
        assert_eq!(day_offset(0.0), 0);
        assert_eq!(day_offset(DAY_SECONDS - 0.1), 0);
        assert_eq!(day_offset(DAY_SECONDS), 1);
        assert_eq!(day_offset(6.5 * DAY_SECONDS), 6);
    }
}
