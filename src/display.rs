use chrono::{DateTime, Utc};

use crate::models::{UsageSnapshot, SESSION_WINDOW, WEEKLY_WINDOW};
use crate::status::{self, UsageStatus};

/// Top-level glyph shown by the status item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Green,
    /// Session is running ahead of time while the week is fine.
    Caution,
    Orange,
    Red,
    Unknown,
    /// The last fetch failed.
    Warning,
}

impl Indicator {
    /// Fold the two window statuses by visual priority.
    pub fn combine(session: UsageStatus, weekly: UsageStatus) -> Self {
        if session == UsageStatus::Red || weekly == UsageStatus::Red {
            Indicator::Red
        } else if weekly == UsageStatus::Orange {
            Indicator::Orange
        } else if session == UsageStatus::Orange {
            Indicator::Caution
        } else if session == UsageStatus::Unknown || weekly == UsageStatus::Unknown {
            Indicator::Unknown
        } else {
            Indicator::Green
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Indicator::Green => "\u{1f7e2}",
            Indicator::Caution => "\u{1f7e1}",
            Indicator::Orange => "\u{1f7e0}",
            Indicator::Red => "\u{1f534}",
            Indicator::Unknown => "\u{26aa}",
            Indicator::Warning => "\u{26a0}\u{fe0f}",
        }
    }
}

/// Which parts of the title to show.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TitleOptions {
    pub show_values: bool,
    pub show_labels: bool,
}

/// One row of the detail view.
#[derive(Clone, Debug, PartialEq)]
pub struct DetailRow {
    pub title: &'static str,
    pub percentage: Option<f64>,
    pub status: UsageStatus,
    pub time_remaining: String,
}

impl DetailRow {
    /// Whole-percent text, or the placeholder when unknown.
    pub fn percentage_text(&self) -> String {
        match self.percentage {
            Some(p) => format!("{}%", p as i64),
            None => status::NO_RESET_PLACEHOLDER.to_string(),
        }
    }

    pub fn advice(&self) -> Option<&'static str> {
        match self.status {
            UsageStatus::Orange => Some("Slow down!"),
            UsageStatus::Red => Some("Almost exhausted"),
            _ => None,
        }
    }
}

/// Everything a front-end needs to draw one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayModel {
    pub indicator: Indicator,
    pub title: String,
    pub rows: [DetailRow; 2],
    pub error: Option<String>,
    /// How long ago the shown values were fetched.
    pub updated: String,
}

impl DisplayModel {
    pub fn build(snapshot: &UsageSnapshot, options: TitleOptions, now: DateTime<Utc>) -> Self {
        let session_status = UsageStatus::for_window(&snapshot.session(), now, SESSION_WINDOW);
        let weekly_status = UsageStatus::for_window(&snapshot.weekly(), now, WEEKLY_WINDOW);

        let indicator = if snapshot.last_error.is_some() {
            Indicator::Warning
        } else {
            Indicator::combine(session_status, weekly_status)
        };

        let rows = [
            DetailRow {
                title: "Session (5hr)",
                percentage: snapshot.session_usage,
                status: session_status,
                time_remaining: status::time_remaining(snapshot.session_reset_at, now),
            },
            DetailRow {
                title: "Weekly (7d)",
                percentage: snapshot.weekly_usage,
                status: weekly_status,
                time_remaining: status::time_remaining(snapshot.weekly_reset_at, now),
            },
        ];

        Self {
            indicator,
            title: title(snapshot, indicator, options),
            rows,
            error: snapshot.last_error.clone(),
            updated: updated_text(snapshot.last_updated, now),
        }
    }
}

fn updated_text(last_updated: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = last_updated else {
        return "never".to_string();
    };
    let minutes = now.signed_duration_since(at).num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes >= 24 * 60 {
        format!("{}d {}h ago", minutes / (24 * 60), (minutes % (24 * 60)) / 60)
    } else if minutes >= 60 {
        format!("{}h {}m ago", minutes / 60, minutes % 60)
    } else {
        format!("{minutes}m ago")
    }
}

fn title(snapshot: &UsageSnapshot, indicator: Indicator, options: TitleOptions) -> String {
    let icon = indicator.glyph();
    let labels = options.show_values && options.show_labels;

    if !options.show_values {
        return icon.to_string();
    }

    match (snapshot.session_usage, snapshot.weekly_usage) {
        (Some(session), Some(weekly)) => {
            let (session, weekly) = (session as i64, weekly as i64);
            if labels {
                format!("{icon} S: {session}% \u{00b7} W: {weekly}%")
            } else {
                format!("{icon} {session}% \u{00b7} {weekly}%")
            }
        }
        _ if snapshot.is_loading => {
            if labels {
                format!("{icon} S: ... - W: ...")
            } else {
                format!("{icon} ...")
            }
        }
        _ => icon.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    const VALUES: TitleOptions = TitleOptions {
        show_values: true,
        show_labels: false,
    };
    const LABELS: TitleOptions = TitleOptions {
        show_values: true,
        show_labels: true,
    };

    #[test]
    fn test_combine_priority() {
        use UsageStatus::*;
        assert_eq!(Indicator::combine(Red, Green), Indicator::Red);
        assert_eq!(Indicator::combine(Unknown, Red), Indicator::Red);
        assert_eq!(Indicator::combine(Orange, Orange), Indicator::Orange);
        assert_eq!(Indicator::combine(Green, Orange), Indicator::Orange);
        assert_eq!(Indicator::combine(Orange, Green), Indicator::Caution);
        assert_eq!(Indicator::combine(Orange, Unknown), Indicator::Caution);
        assert_eq!(Indicator::combine(Unknown, Green), Indicator::Unknown);
        assert_eq!(Indicator::combine(Green, Green), Indicator::Green);
    }

    #[test]
    fn test_title_variants() {
        let snapshot = UsageSnapshot {
            session_usage: Some(16.7),
            weekly_usage: Some(43.0),
            ..Default::default()
        };

        let plain = DisplayModel::build(&snapshot, VALUES, now());
        assert_eq!(plain.indicator, Indicator::Green);
        assert_eq!(plain.title, "\u{1f7e2} 16% \u{00b7} 43%");

        let labelled = DisplayModel::build(&snapshot, LABELS, now());
        assert_eq!(labelled.title, "\u{1f7e2} S: 16% \u{00b7} W: 43%");

        let icon_only = DisplayModel::build(&snapshot, TitleOptions::default(), now());
        assert_eq!(icon_only.title, "\u{1f7e2}");

        let labels_without_values = TitleOptions {
            show_values: false,
            show_labels: true,
        };
        assert_eq!(DisplayModel::build(&snapshot, labels_without_values, now()).title, "\u{1f7e2}");
    }

    #[test]
    fn test_loading_title() {
        let snapshot = UsageSnapshot {
            is_loading: true,
            ..Default::default()
        };
        let model = DisplayModel::build(&snapshot, LABELS, now());
        assert_eq!(model.indicator, Indicator::Unknown);
        assert_eq!(model.title, "\u{26aa} S: ... - W: ...");
        assert_eq!(DisplayModel::build(&snapshot, VALUES, now()).title, "\u{26aa} ...");
    }

    #[test]
    fn test_error_shows_warning_with_stale_values() {
        let snapshot = UsageSnapshot {
            session_usage: Some(20.0),
            weekly_usage: Some(30.0),
            last_error: Some("No Claude credentials found".to_string()),
            ..Default::default()
        };
        let model = DisplayModel::build(&snapshot, VALUES, now());
        assert_eq!(model.indicator, Indicator::Warning);
        assert_eq!(model.title, "\u{26a0}\u{fe0f} 20% \u{00b7} 30%");
        assert_eq!(model.error.as_deref(), Some("No Claude credentials found"));

        let empty = UsageSnapshot {
            last_error: Some("x".to_string()),
            ..Default::default()
        };
        assert_eq!(DisplayModel::build(&empty, VALUES, now()).title, "\u{26a0}\u{fe0f}");
    }

    #[test]
    fn test_detail_rows() {
        let snapshot = UsageSnapshot {
            session_usage: Some(90.0),
            session_reset_at: Some(now() + Duration::hours(1)),
            weekly_usage: Some(100.0),
            weekly_reset_at: Some(now() + Duration::days(2) + Duration::hours(3)),
            ..Default::default()
        };
        let model = DisplayModel::build(&snapshot, VALUES, now());
        assert_eq!(model.indicator, Indicator::Red);

        let [session, weekly] = &model.rows;
        assert_eq!(session.title, "Session (5hr)");
        assert_eq!(session.status, UsageStatus::Orange);
        assert_eq!(session.time_remaining, "1h 0m");
        assert_eq!(session.percentage_text(), "90%");
        assert_eq!(session.advice(), Some("Slow down!"));

        assert_eq!(weekly.status, UsageStatus::Red);
        assert_eq!(weekly.time_remaining, "2d 3h");
        assert_eq!(weekly.advice(), Some("Almost exhausted"));
    }

    #[test]
    fn test_unknown_rows() {
        let model = DisplayModel::build(&UsageSnapshot::default(), VALUES, now());
        for row in &model.rows {
            assert_eq!(row.status, UsageStatus::Unknown);
            assert_eq!(row.percentage_text(), "--");
            assert_eq!(row.time_remaining, "--");
            assert_eq!(row.advice(), None);
        }
    }

    #[test]
    fn test_updated_age() {
        let mut snapshot = UsageSnapshot::default();
        assert_eq!(DisplayModel::build(&snapshot, VALUES, now()).updated, "never");

        snapshot.last_updated = Some(now() - Duration::seconds(20));
        assert_eq!(DisplayModel::build(&snapshot, VALUES, now()).updated, "just now");

        snapshot.last_updated = Some(now() - Duration::minutes(42));
        assert_eq!(DisplayModel::build(&snapshot, VALUES, now()).updated, "42m ago");

        snapshot.last_updated = Some(now() - Duration::days(6) - Duration::hours(5));
        let model = DisplayModel::build(&snapshot, VALUES, now());
        assert_eq!(model.updated, "6d 5h ago");
        assert_eq!(model.indicator, Indicator::Unknown);
    }
}
