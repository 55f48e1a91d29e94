use chrono::{DateTime, Duration, Utc};

/// Length of the rolling session quota window.
pub const SESSION_WINDOW: Duration = Duration::hours(5);

/// Length of the rolling weekly quota window.
pub const WEEKLY_WINDOW: Duration = Duration::days(7);

/// One quota window as last reported upstream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageWindow {
    /// Percentage already normalized to 0..=100 by the endpoint.
    pub utilization: Option<f64>,
    pub resets_at: Option<DateTime<Utc>>,
}

/// Result of one successful fetch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageReading {
    pub session: Option<UsageWindow>,
    pub weekly: Option<UsageWindow>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// The state published by the poller after every cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageSnapshot {
    pub session_usage: Option<f64>,
    pub weekly_usage: Option<f64>,
    pub session_reset_at: Option<DateTime<Utc>>,
    pub weekly_reset_at: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub last_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl UsageSnapshot {
    /// Replace both windows wholesale and clear any pending error.
    pub fn apply_reading(&mut self, reading: UsageReading, now: DateTime<Utc>) {
        let session = reading.session.unwrap_or_default();
        let weekly = reading.weekly.unwrap_or_default();

        self.session_usage = session.utilization;
        self.session_reset_at = session.resets_at;
        self.weekly_usage = weekly.utilization;
        self.weekly_reset_at = weekly.resets_at;
        self.last_error = None;
        self.last_updated = Some(reading.fetched_at.unwrap_or(now));
    }

    /// Record a failed cycle. Last-known-good values stay visible.
    pub fn apply_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    pub fn session(&self) -> UsageWindow {
        UsageWindow {
            utilization: self.session_usage,
            resets_at: self.session_reset_at,
        }
    }

    pub fn weekly(&self) -> UsageWindow {
        UsageWindow {
            utilization: self.weekly_usage,
            resets_at: self.weekly_reset_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_error_keeps_previous_values() {
        let mut snapshot = UsageSnapshot::default();
        snapshot.apply_reading(
            UsageReading {
                session: Some(UsageWindow {
                    utilization: Some(42.0),
                    resets_at: Some(at(5)),
                }),
                weekly: None,
                fetched_at: None,
            },
            at(1),
        );
        snapshot.apply_error("boom".to_string());

        assert_eq!(snapshot.session_usage, Some(42.0));
        assert_eq!(snapshot.session_reset_at, Some(at(5)));
        assert_eq!(snapshot.last_error.as_deref(), Some("boom"));
        assert_eq!(snapshot.last_updated, Some(at(1)));
    }

    #[test]
    fn test_reading_replaces_wholesale_and_clears_error() {
        let mut snapshot = UsageSnapshot {
            session_usage: Some(10.0),
            weekly_usage: Some(20.0),
            weekly_reset_at: Some(at(3)),
            last_error: Some("old".to_string()),
            ..Default::default()
        };
        snapshot.apply_reading(
            UsageReading {
                session: Some(UsageWindow {
                    utilization: Some(11.0),
                    resets_at: None,
                }),
                weekly: None,
                fetched_at: Some(at(2)),
            },
            at(4),
        );

        assert_eq!(snapshot.session_usage, Some(11.0));
        assert_eq!(snapshot.weekly_usage, None);
        assert_eq!(snapshot.weekly_reset_at, None);
        assert!(snapshot.last_error.is_none());
        assert_eq!(snapshot.last_updated, Some(at(2)));
    }
}
