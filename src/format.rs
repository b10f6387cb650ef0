//! Human-readable sizes, durations and ages for CLI output.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Formats a byte count with binary units (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];

    UNITS
        .iter()
        .find(|(_, size)| bytes >= *size)
        .map_or_else(
            || format!("{bytes} B"),
            |(unit, size)| format!("{:.2} {unit}", bytes as f64 / *size as f64),
        )
}

/// Formats a duration as `5.0s`, `1m 05s` or `1h 01m 05s`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        3600.. => format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60),
        60.. => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{secs}.{}s", d.subsec_millis() / 100),
    }
}

/// Formats how long ago `at` was, relative to `now`.
///
/// Timestamps in the future (clock skew) read as `just now`.
#[must_use]
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    match (now - at).to_std() {
        Ok(age) if age >= Duration::from_secs(1) => format!("{} ago", format_duration(age)),
        _ => "just now".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
    }

    #[test]
    fn format_duration_units() {
        assert_eq!(format_duration(Duration::from_millis(5300)), "5.3s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 01m 05s");
    }

    #[test]
    fn format_age_past_and_future() {
        let now = Utc::now();
        assert_eq!(format_age(now - chrono::Duration::seconds(90), now), "1m 30s ago");
        assert_eq!(format_age(now + chrono::Duration::seconds(5), now), "just now");
        assert_eq!(format_age(now, now), "just now");
    }
}
