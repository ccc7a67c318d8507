use chrono::{DateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde_json::Value;

/// Wall-clock instant used for record and envelope timestamps.
pub type Timestamp = DateTime<Utc>;

/// The current instant, truncated to the millisecond precision timestamps
/// are stored with.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(3)
}

/// Parse a timestamp as stored inside a record.
///
/// Accepts RFC 3339 / ISO-8601 strings and epoch-millisecond numbers, the two
/// shapes journal data has been written in. Anything else yields `None`.
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Format a timestamp the way records carry it: UTC, millisecond precision,
/// `Z` suffix (e.g. `2024-03-01T07:15:00.000Z`).
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Like [`format_timestamp`], but keeps any sub-millisecond digits so the
/// text parses back to the same instant.
pub fn format_timestamp_exact(ts: &Timestamp) -> String {
    if ts.timestamp_subsec_nanos() % 1_000_000 == 0 {
        format_timestamp(ts)
    } else {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_iso_strings() {
        let ts = parse_timestamp(&json!("2024-03-01T07:15:00.000Z")).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_709_277_300_000);
    }

    #[test]
    fn parses_offset_strings_into_utc() {
        let a = parse_timestamp(&json!("2024-03-01T09:15:00+02:00")).unwrap();
        let b = parse_timestamp(&json!("2024-03-01T07:15:00Z")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_epoch_millis() {
        let ts = parse_timestamp(&json!(1_709_277_300_000i64)).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T07:15:00.000Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(true)).is_none());
        assert!(parse_timestamp(&Value::Null).is_none());
    }

    #[test]
    fn exact_format_keeps_sub_millisecond_digits() {
        let ts = parse_timestamp(&json!("2024-03-01T07:15:00.123456Z")).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T07:15:00.123Z");
        assert_eq!(format_timestamp_exact(&ts), "2024-03-01T07:15:00.123456Z");
        assert_eq!(parse_timestamp(&json!(format_timestamp_exact(&ts))), Some(ts));

        let whole = parse_timestamp(&json!("2024-03-01T07:15:00Z")).unwrap();
        assert_eq!(format_timestamp_exact(&whole), "2024-03-01T07:15:00.000Z");
    }

    #[test]
    fn format_round_trips() {
        let ts = now();
        let s = format_timestamp(&ts);
        let back = parse_timestamp(&Value::String(s)).unwrap();
        assert_eq!(back, ts);
    }
}
