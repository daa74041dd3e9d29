//! SMS dispatch seam and alert message formatting.
//!
//! `SmsSender::send` is fire-and-forget: success means the text was handed
//! to the SMS subsystem, not that the carrier delivered it.

use crate::logging::format_timestamp_millis;

/// A single resolved geographic coordinate with its acquisition time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Unix epoch milliseconds when the fix was taken.
    pub timestamp_millis: u64,
}

#[derive(Debug)]
pub enum SmsError {
    Dispatch(String),
}

impl std::fmt::Display for SmsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmsError::Dispatch(error) => write!(f, "sms dispatch error: {error}"),
        }
    }
}

impl std::error::Error for SmsError {}

/// "Send text to number" primitive.
pub trait SmsSender: Send + Sync {
    fn send(&self, number: &str, body: &str) -> Result<(), SmsError>;
}

/// Follow-up SMS body for a cached (last-known) fix.
pub fn format_last_location_message(fix: &Fix) -> String {
    format!(
        "Last known location: latitude {}, longitude {} (as of {})",
        fix.latitude,
        fix.longitude,
        format_timestamp_millis(fix.timestamp_millis)
    )
}

/// Follow-up SMS body for a freshly acquired fix.
pub fn format_current_location_message(fix: &Fix) -> String {
    format!(
        "Current location: latitude {}, longitude {} (at {})",
        fix.latitude,
        fix.longitude,
        format_timestamp_millis(fix.timestamp_millis)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_location_message_contains_coordinates() {
        let fix = Fix {
            latitude: 37.0,
            longitude: -122.0,
            timestamp_millis: 1_404_304_245_000,
        };
        let body = format_last_location_message(&fix);
        assert!(body.contains("37"));
        assert!(body.contains("-122"));
        assert!(body.contains("20140702"));
        assert!(body.starts_with("Last known location"));
    }

    #[test]
    fn current_location_message_is_distinct() {
        let fix = Fix {
            latitude: 51.5,
            longitude: -0.12,
            timestamp_millis: 0,
        };
        let current = format_current_location_message(&fix);
        let last = format_last_location_message(&fix);
        assert!(current.starts_with("Current location"));
        assert_ne!(current, last);
    }
}
