//! Event channel types
//!
//! Every entity-store mutation is published as one `TrackingEvent` on a
//! single ordered channel. `seq` is monotonic in publish order within the
//! process; `data` is the record's JSON view at publish time.

use crate::ids::{EntityId, IdKind};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// What a tracking event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// A record was created
    Created,
    /// An existing record was amended
    Updated,
}

/// One entry on the ordered event channel.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingEvent {
    /// Channel sequence number, monotonic in publish order
    pub seq: u64,
    /// Entity kind
    pub kind: IdKind,
    /// Entity id
    pub id: EntityId,
    /// Created or updated
    pub action: EventAction,
    /// JSON view of the record at publish time
    pub data: JsonValue,
}

/// Serialize a record into the event payload form.
///
/// Fail-open: a record that cannot serialize becomes `null` rather than an
/// error reaching the caller.
pub fn record_payload<T: Serialize>(record: &T) -> JsonValue {
    serde_json::to_value(record).unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::StreamRecord;

    #[test]
    fn test_event_serialization_shape() {
        let id = EntityId::new(IdKind::Stream, 4);
        let event = TrackingEvent {
            seq: 9,
            kind: IdKind::Stream,
            id,
            action: EventAction::Created,
            data: record_payload(&StreamRecord::new(id, None)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 9);
        assert_eq!(json["kind"], "stream");
        assert_eq!(json["id"], "stream#4");
        assert_eq!(json["action"], "created");
        assert_eq!(json["data"]["id"], "stream#4");
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in IdKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            let back: IdKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }
}
