//! Push-channel protocol types.
//!
//! Frame shapes for the multiplexed WebSocket shared by all rooms of a
//! session. Inbound frames are validated at ingress into the tagged
//! `PushFrame` union; unknown shapes are rejected, never trusted.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::models::{RoomId, RoomSummary, WireMessage};

/// Typed push-channel addressing. One message channel per room, plus two
/// account-scoped channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    /// Message delivery for one room.
    RoomMessages(RoomId),
    /// Account-scoped room-list-changed notifications.
    RoomList,
    /// Account-scoped unread-total updates.
    UnreadTotal,
}

impl Channel {
    /// The server-side destination string this channel subscribes to.
    pub fn destination(&self) -> String {
        match self {
            Channel::RoomMessages(room_id) => format!("/topic/rooms/{room_id}/messages"),
            Channel::RoomList => "/user/queue/rooms".to_string(),
            Channel::UnreadTotal => "/user/queue/unread".to_string(),
        }
    }

    /// Parse a destination string back into a channel. Returns `None` for
    /// destinations this client never subscribes to.
    pub fn parse(destination: &str) -> Option<Channel> {
        match destination {
            "/user/queue/rooms" => Some(Channel::RoomList),
            "/user/queue/unread" => Some(Channel::UnreadTotal),
            _ => {
                let rest = destination.strip_prefix("/topic/rooms/")?;
                let id = rest.strip_suffix("/messages")?;
                id.parse().ok().map(Channel::RoomMessages)
            }
        }
    }

    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Channel::RoomMessages(id) => Some(*id),
            _ => None,
        }
    }
}

/// Frames sent FROM the client TO the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Begin receiving frames for a destination. Idempotent server-side.
    Subscribe { destination: String },
    /// Stop receiving frames for a destination.
    Unsubscribe { destination: String },
    /// Publish a message to a room's send destination. The server assigns
    /// the message id and timestamp and echoes `echo_id` back on the
    /// sender's own message frame.
    Publish {
        destination: String,
        content: String,
        echo_id: String,
    },
}

impl ClientFrame {
    pub fn subscribe(channel: &Channel) -> Self {
        ClientFrame::Subscribe {
            destination: channel.destination(),
        }
    }

    pub fn unsubscribe(channel: &Channel) -> Self {
        ClientFrame::Unsubscribe {
            destination: channel.destination(),
        }
    }

    pub fn publish(room_id: RoomId, content: &str, echo_id: &str) -> Self {
        ClientFrame::Publish {
            destination: format!("/app/rooms/{room_id}/send"),
            content: content.to_string(),
            echo_id: echo_id.to_string(),
        }
    }
}

/// Frames pushed FROM the server TO the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushFrame {
    /// A message delivered on a room channel.
    Message {
        room_id: RoomId,
        message: WireMessage,
    },
    /// A room changed (new last-message time, unread count, hide/restore).
    /// Delivered on the account-scoped room-list channel.
    RoomChanged { room: RoomSummary },
    /// The account's global unread total changed.
    UnreadTotal { total: u32 },
}

/// Validate one inbound text frame at ingress. Unknown tags and malformed
/// payloads are errors; the dispatcher logs and drops them.
pub fn decode_frame(text: &str) -> Result<PushFrame> {
    serde_json::from_str(text).map_err(|e| ChatError::Frame(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn channel_destinations() {
        assert_eq!(
            Channel::RoomMessages(7).destination(),
            "/topic/rooms/7/messages"
        );
        assert_eq!(Channel::RoomList.destination(), "/user/queue/rooms");
        assert_eq!(Channel::UnreadTotal.destination(), "/user/queue/unread");
    }

    #[test]
    fn channel_parse_roundtrip() {
        for ch in [
            Channel::RoomMessages(7),
            Channel::RoomMessages(0),
            Channel::RoomList,
            Channel::UnreadTotal,
        ] {
            assert_eq!(Channel::parse(&ch.destination()), Some(ch));
        }
    }

    #[test]
    fn channel_parse_rejects_foreign_destinations() {
        assert!(Channel::parse("/topic/rooms/7").is_none());
        assert!(Channel::parse("/topic/rooms/abc/messages").is_none());
        assert!(Channel::parse("/queue/other").is_none());
        assert!(Channel::parse("").is_none());
    }

    #[test]
    fn client_frame_subscribe_serde() {
        let frame = ClientFrame::subscribe(&Channel::RoomMessages(7));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "Subscribe");
        assert_eq!(json["destination"], "/topic/rooms/7/messages");
    }

    #[test]
    fn client_frame_publish_serde() {
        let frame = ClientFrame::publish(7, "Hello", "echo-1");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "Publish");
        assert_eq!(json["destination"], "/app/rooms/7/send");
        assert_eq!(json["content"], "Hello");
        assert_eq!(json["echo_id"], "echo-1");
    }

    #[test]
    fn decode_message_frame() {
        let json = r#"{
            "type": "Message",
            "room_id": 7,
            "message": {
                "id": 12,
                "room_id": 7,
                "sender_id": "shelter-1",
                "content": "She loves walks",
                "sent_at": "2024-06-01T10:00:00Z"
            }
        }"#;
        match decode_frame(json).unwrap() {
            PushFrame::Message { room_id, message } => {
                assert_eq!(room_id, 7);
                assert_eq!(message.id, 12);
                assert_eq!(message.content, "She loves walks");
                assert!(message.echo_id.is_none());
            }
            other => panic!("expected Message, got {:?}", other),
        }
    }

    #[test]
    fn decode_room_changed_frame() {
        let json = r#"{
            "type": "RoomChanged",
            "room": {
                "id": 7,
                "subject_id": 42,
                "counterparty_id": "shelter-1",
                "unread_count": 3,
                "last_message_at": "2024-06-01T10:00:00Z"
            }
        }"#;
        match decode_frame(json).unwrap() {
            PushFrame::RoomChanged { room } => {
                assert_eq!(room.id, 7);
                assert_eq!(room.unread_count, 3);
                assert_eq!(
                    room.last_message_at,
                    Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap())
                );
            }
            other => panic!("expected RoomChanged, got {:?}", other),
        }
    }

    #[test]
    fn decode_unread_total_frame() {
        match decode_frame(r#"{"type":"UnreadTotal","total":5}"#).unwrap() {
            PushFrame::UnreadTotal { total } => assert_eq!(total, 5),
            other => panic!("expected UnreadTotal, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let err = decode_frame(r#"{"type":"Telemetry","data":1}"#).unwrap_err();
        assert!(matches!(err, ChatError::Frame(_)));
    }

    #[test]
    fn decode_rejects_missing_fields() {
        assert!(decode_frame(r#"{"type":"Message","room_id":7}"#).is_err());
        assert!(decode_frame("not json").is_err());
    }

    #[test]
    fn push_frame_roundtrip_all_variants() {
        let frames = vec![
            PushFrame::Message {
                room_id: 7,
                message: WireMessage {
                    id: 1,
                    room_id: 7,
                    sender_id: "u".into(),
                    content: "hi".into(),
                    sent_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
                    echo_id: Some("e-1".into()),
                },
            },
            PushFrame::RoomChanged {
                room: serde_json::from_str(r#"{"id":1,"subject_id":2,"counterparty_id":"u"}"#)
                    .unwrap(),
            },
            PushFrame::UnreadTotal { total: 0 },
        ];
        for frame in frames {
            let json = serde_json::to_string(&frame).unwrap();
            let _ = decode_frame(&json).unwrap();
        }
    }
}
