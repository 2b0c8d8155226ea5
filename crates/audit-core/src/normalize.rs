use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::AuditRecord;

/// Sentinel applied when a structured field is missing or has the wrong type.
pub const UNKNOWN: &str = "Unknown";

/// Naive date-time layouts accepted in addition to RFC 3339.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
];

/// Build a canonical audit record from a raw message body.
///
/// Total over its input: malformed or non-JSON text degrades to the raw
/// body as `data` with every structured field defaulted. A single clock
/// read supplies both `received_at` and the `timestamp` fallback.
pub fn normalize(raw: &str, default_source: &str) -> AuditRecord {
    let now = Utc::now();

    // Anything that is not a JSON object yields no extractable fields.
    let fields = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        });

    let (event_type, entity_type, timestamp, data, source) = match fields {
        Some(map) => (
            string_field(&map, "EventType").unwrap_or_else(|| UNKNOWN.to_string()),
            string_field(&map, "EntityType").unwrap_or_else(|| UNKNOWN.to_string()),
            map.get("Timestamp")
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
                .unwrap_or(now),
            // Raw structured text, nested JSON preserved rather than unwrapped.
            map.get("Data")
                .map(|value| value.to_string())
                .unwrap_or_else(|| raw.to_string()),
            string_field(&map, "Source").unwrap_or_else(|| default_source.to_string()),
        ),
        None => (
            UNKNOWN.to_string(),
            UNKNOWN.to_string(),
            now,
            raw.to_string(),
            default_source.to_string(),
        ),
    };

    AuditRecord {
        id: Uuid::new_v4(),
        event_id: Uuid::new_v4().to_string(),
        event_type,
        entity_type,
        timestamp,
        data,
        source,
        received_at: now,
    }
}

fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    None
}
