use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical audit record persisted for every consumed event.
///
/// Built once per processing cycle and never mutated after the write
/// call returns; ownership passes to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Unique per record, assigned before insert.
    pub id: Uuid,

    /// Random unique token; source messages carry no event id field.
    pub event_id: String,

    /// Event type as published, "Unknown" when the message omits it.
    pub event_type: String,

    /// Entity type as published, "Unknown" when the message omits it.
    pub entity_type: String,

    /// Source-provided event time, or the processing instant when
    /// absent or unparseable.
    pub timestamp: DateTime<Utc>,

    /// Raw structured text of the `Data` field, or the whole message
    /// body when no such field exists.
    pub data: String,

    /// Publishing system, defaulting to the broker's logical name.
    pub source: String,

    /// Instant processing began, independent of any source value.
    pub received_at: DateTime<Utc>,
}
