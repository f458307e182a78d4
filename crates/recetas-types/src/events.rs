use serde::{Deserialize, Serialize};

use crate::models::InsertedRow;

/// Broadcast event name used for typing announcements.
pub const TYPING_EVENT: &str = "typing";

/// Events relayed by the realtime hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// A row was inserted into a table
    RowInserted { table: String, row: InsertedRow },

    /// Arbitrary payload broadcast on a named channel
    Broadcast {
        channel: String,
        event: String,
        payload: serde_json::Value,
    },
}

impl RealtimeEvent {
    /// Returns the topic this event is delivered on.
    /// Inserts go to `table:<name>`, broadcasts to `channel:<name>`.
    pub fn topic(&self) -> String {
        match self {
            Self::RowInserted { table, .. } => table_topic(table),
            Self::Broadcast { channel, .. } => channel_topic(channel),
        }
    }
}

pub fn table_topic(table: &str) -> String {
    format!("table:{}", table)
}

pub fn channel_topic(channel: &str) -> String {
    format!("channel:{}", channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_do_not_collide() {
        let broadcast = RealtimeEvent::Broadcast {
            channel: "mensajes".into(),
            event: TYPING_EVENT.into(),
            payload: serde_json::Value::Null,
        };
        assert_eq!(broadcast.topic(), "channel:mensajes");
        assert_ne!(broadcast.topic(), table_topic("mensajes"));
    }

    #[test]
    fn test_wire_format_is_tagged() {
        let event = RealtimeEvent::Broadcast {
            channel: "typing-channel".into(),
            event: TYPING_EVENT.into(),
            payload: serde_json::json!({ "peer_id": "u1" }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Broadcast");
        assert_eq!(json["data"]["event"], "typing");
    }
}
