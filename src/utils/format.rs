//! Formatting helpers for display values.

use chrono::{DateTime, Utc};

/// Format a duration in seconds as a compact human-readable string.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Format how long ago a timestamp was, for the retry-age column.
pub fn format_age(at: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(at);
    let secs = elapsed.num_seconds().max(0) as u64;
    format!("{} ago", format_duration(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_only() {
        assert_eq!(format_duration(42), "42s");
    }

    #[test]
    fn minutes_and_seconds() {
        assert_eq!(format_duration(125), "2m 5s");
    }

    #[test]
    fn hours_and_minutes() {
        assert_eq!(format_duration(3725), "1h 2m");
    }

    #[test]
    fn age_of_recent_timestamp() {
        let age = format_age(Utc::now() - chrono::Duration::seconds(30));
        assert!(age.ends_with(" ago"));
    }
}
