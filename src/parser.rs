use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer};

use crate::fetcher::FetchError;
use crate::models::{UsageReading, UsageWindow};

/// Microsecond timestamps with a colon offset, as some upstream writers emit.
const MICROSECOND_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

#[derive(Debug, Default, Deserialize)]
struct RawWindow {
    utilization: Option<f64>,
    resets_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResponse {
    five_hour: Option<RawWindow>,
    seven_day: Option<RawWindow>,
    #[serde(default, deserialize_with = "error_message")]
    error: Option<String>,
    fetched_at: Option<String>,
}

/// Decoded payload from the usage endpoint or the helper's cache file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedUsage {
    pub five_hour: Option<UsageWindow>,
    pub seven_day: Option<UsageWindow>,
    pub error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ParsedUsage {
    /// A payload carrying an error never yields usable windows.
    pub fn into_reading(self) -> Result<UsageReading, FetchError> {
        if let Some(message) = self.error {
            return Err(FetchError::Upstream(message));
        }
        Ok(UsageReading {
            session: self.five_hour,
            weekly: self.seven_day,
            fetched_at: self.fetched_at,
        })
    }
}

pub fn parse(bytes: &[u8]) -> Result<ParsedUsage, FetchError> {
    let raw: RawResponse =
        serde_json::from_slice(bytes).map_err(|e| FetchError::Decode(e.to_string()))?;

    Ok(ParsedUsage {
        five_hour: raw.five_hour.map(into_window),
        seven_day: raw.seven_day.map(into_window),
        error: raw.error,
        fetched_at: raw.fetched_at.as_deref().and_then(parse_timestamp),
    })
}

fn into_window(raw: RawWindow) -> UsageWindow {
    let resets_at = raw.resets_at.as_deref().and_then(|s| {
        let parsed = parse_timestamp(s);
        if parsed.is_none() {
            log::debug!("Unrecognised reset timestamp {s:?}");
        }
        parsed
    });
    UsageWindow {
        utilization: raw.utilization,
        resets_at,
    }
}

/// Parse a reset timestamp, trying whole-second ISO-8601, then fractional
/// ISO-8601, then the microsecond pattern. The first match wins.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let parsers: [fn(&str) -> Option<DateTime<FixedOffset>>; 3] =
        [parse_whole_seconds, parse_fractional_seconds, parse_microseconds];

    parsers
        .iter()
        .find_map(|parse| parse(s))
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_whole_seconds(s: &str) -> Option<DateTime<FixedOffset>> {
    if s.contains('.') {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok()
}

fn parse_fractional_seconds(s: &str) -> Option<DateTime<FixedOffset>> {
    if !s.contains('.') {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok()
}

fn parse_microseconds(s: &str) -> Option<DateTime<FixedOffset>> {
    let normalized = match s.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => s.to_string(),
    };
    DateTime::parse_from_str(&normalized, MICROSECOND_FORMAT).ok()
}

/// Accepts `"error": "text"` as well as the API's `{"message": "text"}` envelope.
fn error_message<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(
            other
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| other.to_string()),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_full_response() {
        let body = br#"{
            "five_hour": {"utilization": 16.0, "resets_at": "2025-11-04T04:59:59.943648+00:00"},
            "seven_day": {"utilization": 43.5, "resets_at": "2025-11-06T03:00:00Z"},
            "seven_day_opus": null
        }"#;

        let parsed = parse(body).unwrap();
        let session = parsed.five_hour.unwrap();
        assert_eq!(session.utilization, Some(16.0));
        assert_eq!(
            session.resets_at.unwrap().timestamp(),
            Utc.with_ymd_and_hms(2025, 11, 4, 4, 59, 59).unwrap().timestamp()
        );
        let weekly = parsed.seven_day.unwrap();
        assert_eq!(weekly.utilization, Some(43.5));
        assert_eq!(
            weekly.resets_at,
            Some(Utc.with_ymd_and_hms(2025, 11, 6, 3, 0, 0).unwrap())
        );
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_all_fields_optional() {
        let parsed = parse(b"{}").unwrap();
        assert_eq!(parsed, ParsedUsage::default());

        let reading = parsed.into_reading().unwrap();
        assert!(reading.session.is_none());
        assert!(reading.weekly.is_none());
    }

    #[test]
    fn test_error_discards_windows() {
        let body = br#"{
            "five_hour": {"utilization": 10.0},
            "seven_day": {"utilization": 20.0},
            "error": "Could not get token"
        }"#;

        let parsed = parse(body).unwrap();
        assert!(parsed.five_hour.is_some());
        match parsed.into_reading() {
            Err(FetchError::Upstream(msg)) => assert_eq!(msg, "Could not get token"),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_envelope_object() {
        let body = br#"{"type": "error", "error": {"type": "authentication_error", "message": "OAuth token has expired"}}"#;
        let parsed = parse(body).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("OAuth token has expired"));
    }

    #[test]
    fn test_null_error_is_absent() {
        let parsed = parse(br#"{"error": null, "five_hour": {"utilization": 1.0}}"#).unwrap();
        assert!(parsed.into_reading().is_ok());
    }

    #[test]
    fn test_structurally_invalid_json() {
        assert!(matches!(parse(b"not json"), Err(FetchError::Decode(_))));
        assert!(matches!(parse(b"[1, 2]"), Err(FetchError::Decode(_))));
        assert!(matches!(
            parse(br#"{"five_hour": {"utilization": "high"}}"#),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn test_unparseable_reset_keeps_utilization() {
        let parsed = parse(br#"{"five_hour": {"utilization": 55.0, "resets_at": "tomorrow"}}"#).unwrap();
        let session = parsed.five_hour.unwrap();
        assert_eq!(session.utilization, Some(55.0));
        assert!(session.resets_at.is_none());
    }

    #[test]
    fn test_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-01-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T00:00:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T02:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T00:00:00.000000+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_microsecond_pattern_directly() {
        let parsed = parse_microseconds("2025-03-10T12:30:45.123456+00:00").unwrap();
        assert_eq!(parsed.timestamp_subsec_micros(), 123_456);
        assert!(parse_microseconds("2025-03-10T12:30:45.123456Z").is_some());
    }
}
