use chrono::{DateTime, Duration, Utc};

use crate::models::UsageWindow;

/// Shown when a window has no reset time.
pub const NO_RESET_PLACEHOLDER: &str = "--";

/// Traffic-light reading for one quota window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageStatus {
    Unknown,
    Green,
    Orange,
    Red,
}

impl UsageStatus {
    /// Compare utilization against how much of the window has elapsed.
    pub fn evaluate(
        utilization: Option<f64>,
        resets_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        let usage = match utilization {
            Some(u) => u,
            None => return UsageStatus::Unknown,
        };
        if usage >= 100.0 {
            return UsageStatus::Red;
        }
        let reset = match resets_at {
            Some(r) => r,
            None => return UsageStatus::Green,
        };

        let window_secs = seconds(window);
        let until_reset = seconds(reset - now);
        let elapsed = window_secs - until_reset;
        let time_percentage = (elapsed / window_secs * 100.0).clamp(0.0, 100.0);

        if usage > time_percentage {
            UsageStatus::Orange
        } else {
            UsageStatus::Green
        }
    }

    pub fn for_window(usage: &UsageWindow, now: DateTime<Utc>, window: Duration) -> Self {
        Self::evaluate(usage.utilization, usage.resets_at, now, window)
    }
}

fn seconds(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

/// Format the time left until `resets_at` as "2d 3h", "4h 10m" or "12m".
pub fn time_remaining(resets_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let reset = match resets_at {
        Some(t) => t,
        None => return NO_RESET_PLACEHOLDER.to_string(),
    };

    let remaining = reset - now;
    if remaining <= Duration::zero() {
        return "now".to_string();
    }

    let total_secs = remaining.num_seconds();
    let total_hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;

    if total_hours >= 24 {
        format!("{}d {}h", total_hours / 24, total_hours % 24)
    } else if total_hours >= 1 {
        format!("{total_hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
