use serde::Serialize;

/// What the `/api/events` stream sends. Changes carry no payload:
/// clients re-query whatever they display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "eventType")]
pub enum JournalEvent {
    Changed,
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        assert_eq!(serde_json::to_string(&JournalEvent::Changed).unwrap(), r#"{"eventType":"changed"}"#);
        assert_eq!(
            serde_json::to_string(&JournalEvent::Heartbeat).unwrap(),
            r#"{"eventType":"heartbeat"}"#
        );
    }
}
