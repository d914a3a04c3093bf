// JSON frames exchanged with notification clients.
//
// Every frame is an object tagged by `type`. Field names are camelCase.

use serde::{Deserialize, Deserializer, Serialize};

use crate::notify::{Notification, NotificationStats, NotificationType, OrderEvent};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(deserialize_with = "string_or_number")]
        user_id: String,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    MarkRead {
        notification_id: i64,
    },
    MarkAllRead,
    History {
        #[serde(default)]
        page: usize,
        #[serde(default)]
        size: Option<usize>,
        /// Only list notifications of this type.
        #[serde(default)]
        notification_type: Option<NotificationType>,
    },
    Stats,
    OrderEvent(OrderEvent),
    Broadcast {
        message: String,
        #[serde(default = "default_broadcast_type")]
        notification_type: NotificationType,
    },
}

fn default_broadcast_type() -> NotificationType {
    NotificationType::System
}

/// Accept `"25"` and `25` alike for user ids.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkStatus {
    Success,
    NotFound,
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connection {
        session_id: u64,
        message: String,
        timestamp: i64,
    },
    Subscribed {
        user_id: String,
        message: String,
        unread_count: u64,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    MarkedRead {
        notification_id: i64,
        status: MarkStatus,
        timestamp: i64,
    },
    MarkedAllRead {
        user_id: String,
        count: usize,
        timestamp: i64,
    },
    History {
        user_id: String,
        page: usize,
        size: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notification_type: Option<NotificationType>,
        notifications: Vec<Notification>,
        unread_count: u64,
    },
    Stats {
        user_id: String,
        stats: NotificationStats,
    },
    Notification(Notification),
    Error {
        message: String,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

// ---------------------------------------------------------------------------
// Errors and helpers
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Parse one text frame from a client.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Malformed)
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_subscribe_with_string_or_numeric_id() {
        let a = parse_client_message(r#"{"type":"subscribe","userId":"25"}"#).unwrap();
        let b = parse_client_message(r#"{"type":"subscribe","userId":25}"#).unwrap();
        let expected = ClientMessage::Subscribe {
            user_id: "25".into(),
        };
        assert_eq!(a, expected);
        assert_eq!(b, expected);
    }

    #[test]
    fn parses_simple_requests() {
        assert_eq!(
            parse_client_message(r#"{"type":"ping","timestamp":123}"#).unwrap(),
            ClientMessage::Ping {
                timestamp: Some(123)
            }
        );
        assert_eq!(
            parse_client_message(r#"{"type":"markRead","notificationId":5}"#).unwrap(),
            ClientMessage::MarkRead { notification_id: 5 }
        );
        assert_eq!(
            parse_client_message(r#"{"type":"markAllRead"}"#).unwrap(),
            ClientMessage::MarkAllRead
        );
        assert_eq!(
            parse_client_message(r#"{"type":"history"}"#).unwrap(),
            ClientMessage::History {
                page: 0,
                size: None,
                notification_type: None
            }
        );
        assert_eq!(
            parse_client_message(r#"{"type":"stats"}"#).unwrap(),
            ClientMessage::Stats
        );
    }

    #[test]
    fn history_accepts_type_filter() {
        assert_eq!(
            parse_client_message(r#"{"type":"history","page":1,"size":5,"notificationType":"DELIVERY"}"#)
                .unwrap(),
            ClientMessage::History {
                page: 1,
                size: Some(5),
                notification_type: Some(NotificationType::Delivery)
            }
        );
        assert!(
            parse_client_message(r#"{"type":"history","notificationType":"WEATHER"}"#).is_err()
        );
    }

    #[test]
    fn parses_order_event_fields_inline() {
        let msg = parse_client_message(
            r#"{"type":"orderEvent","orderId":7,"customerId":3,"eventType":"ORDER_SHIPPED","status":"SHIPPED","totalAmount":50.0}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::OrderEvent(e) => {
                assert_eq!(e.order_id, 7);
                assert_eq!(e.customer_id, 3);
                assert_eq!(e.event_type, "ORDER_SHIPPED");
            }
            other => panic!("expected order event, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_type_defaults_to_system() {
        let msg = parse_client_message(r#"{"type":"broadcast","message":"Closing early"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Broadcast {
                message: "Closing early".into(),
                notification_type: NotificationType::System
            }
        );
    }

    #[test]
    fn rejects_unknown_and_malformed_frames() {
        assert!(parse_client_message(r#"{"type":"teleport"}"#).is_err());
        assert!(parse_client_message("not json").is_err());
        assert!(parse_client_message(r#"{"type":"markRead"}"#).is_err());
    }

    #[test]
    fn server_frames_use_snake_case_tags_and_camel_case_fields() {
        let v = serde_json::to_value(ServerMessage::MarkedRead {
            notification_id: 5,
            status: MarkStatus::NotFound,
            timestamp: 1,
        })
        .unwrap();
        assert_eq!(
            v,
            json!({"type":"marked_read","notificationId":5,"status":"not_found","timestamp":1})
        );

        let v = serde_json::to_value(ServerMessage::Subscribed {
            user_id: "25".into(),
            message: "ok".into(),
            unread_count: 2,
            timestamp: 1,
        })
        .unwrap();
        assert_eq!(v["type"], "subscribed");
        assert_eq!(v["userId"], "25");
        assert_eq!(v["unreadCount"], 2);
    }

    #[test]
    fn notification_frame_is_flat() {
        let n = Notification {
            id: 3,
            user_id: "25".into(),
            message: "hi".into(),
            notification_type: NotificationType::Order,
            created_at: "2026-01-01 00:00:00".into(),
            is_read: false,
            metadata: None,
        };
        let v = serde_json::to_value(ServerMessage::Notification(n)).unwrap();
        assert_eq!(v["type"], "notification");
        assert_eq!(v["id"], 3);
        assert_eq!(v["notificationType"], "ORDER");
        assert_eq!(v["isRead"], false);
    }

    #[test]
    fn error_frame_carries_timestamp() {
        let json = ServerMessage::error("nope").to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["message"], "nope");
        assert!(v["timestamp"].as_i64().unwrap() > 0);
    }
}
