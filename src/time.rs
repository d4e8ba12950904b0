use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;
const WEEK: i64 = 604_800;
/// Average Gregorian month.
const MONTH: i64 = 2_629_746;

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Formats a unix timestamp as `MM-DD-YYYY HH:MM:SS` in the configured timezone.
pub fn format_unix(ts: i64, tz: &str) -> Result<String> {
    let tz: chrono_tz::Tz = tz.parse().map_err(|_| anyhow!("invalid tz: {tz}"))?;
    let at = Utc
        .timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| anyhow!("timestamp out of range: {ts}"))?;
    Ok(at.with_timezone(&tz).format("%m-%d-%Y %H:%M:%S").to_string())
}

/// Human-readable length of a span of seconds, two most significant units.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (major, major_unit, minor, minor_unit) = if secs < MINUTE {
        return plural(secs, "second");
    } else if secs < HOUR {
        (secs / MINUTE, "minute", secs % MINUTE, "second")
    } else if secs < DAY {
        (secs / HOUR, "hour", (secs % HOUR) / MINUTE, "minute")
    } else if secs < WEEK {
        (secs / DAY, "day", (secs % DAY) / HOUR, "hour")
    } else if secs < MONTH {
        (secs / WEEK, "week", (secs % WEEK) / DAY, "day")
    } else {
        (secs / MONTH, "month", (secs % MONTH) / DAY, "day")
    };
    format!("{}, {}", plural(major, major_unit), plural(minor, minor_unit))
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_in_timezone() {
        assert_eq!(format_unix(0, "UTC").unwrap(), "01-01-1970 00:00:00");
        assert_eq!(format_unix(0, "America/New_York").unwrap(), "12-31-1969 19:00:00");
        assert!(format_unix(0, "Mars/Olympus").is_err());
    }

    #[test]
    fn durations_keep_two_units() {
        assert_eq!(format_duration(45), "45 seconds");
        assert_eq!(format_duration(61), "1 minute, 1 second");
        assert_eq!(format_duration(7_200), "2 hours, 0 minutes");
        assert_eq!(format_duration(90_000), "1 day, 1 hour");
        assert_eq!(format_duration(WEEK + 2 * DAY), "1 week, 2 days");
        assert_eq!(format_duration(-5), "0 seconds");
    }
}
