use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned room identifier.
pub type RoomId = i64;

/// Identifier of the animal listing a room is about.
pub type SubjectId = i64;

/// Which side of a conversation this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// An individual adopter: one open conversation at a time.
    User,
    /// A shelter operator: many visible conversations at once.
    Operator,
}

/// Session info handed in by the auth collaborator. Read-only here;
/// every component receives it explicitly at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub role: Role,
    pub auth_token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, role: Role, auth_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            auth_token: auth_token.into(),
        }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }
}

/// Soft per-user visibility of a room. Hidden rooms are never physically
/// removed; the server restores them when the counterparty writes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Active,
    Hidden,
}

/// Room payload as the server sends it (REST responses and room-list
/// push frames share this shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub subject_id: SubjectId,
    pub counterparty_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub hidden: bool,
}

/// Room metadata as tracked by the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub subject_id: SubjectId,
    pub counterparty_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub visibility: Visibility,
}

impl From<RoomSummary> for Room {
    fn from(s: RoomSummary) -> Self {
        Self {
            id: s.id,
            subject_id: s.subject_id,
            counterparty_id: s.counterparty_id,
            counterparty_name: s.counterparty_name,
            last_message_at: s.last_message_at,
            unread_count: s.unread_count,
            visibility: if s.hidden {
                Visibility::Hidden
            } else {
                Visibility::Active
            },
        }
    }
}

/// Delivery state of a message in the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Locally appended, awaiting the server echo.
    Pending,
    /// Server-confirmed: carries the server id and timestamp.
    Confirmed,
    /// The echo never arrived within the send timeout. Resend is an
    /// explicit user action.
    Failed,
}

/// Message payload as the server sends it. `echo_id` is present on the
/// sender's own messages: the server echoes back the correlation id the
/// client attached to the publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: i64,
    pub room_id: RoomId,
    pub sender_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo_id: Option<String>,
}

/// A message in a room's local log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id; `None` while the message is pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Client-generated correlation id, stable across the message's life.
    pub echo_id: String,
    pub room_id: RoomId,
    pub sender_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub delivery: DeliveryState,
}

impl Message {
    /// A confirmed message built from a server payload.
    pub fn from_wire(wire: WireMessage) -> Self {
        Self {
            id: Some(wire.id),
            echo_id: wire
                .echo_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            room_id: wire.room_id,
            sender_id: wire.sender_id,
            content: wire.content,
            sent_at: wire.sent_at,
            delivery: DeliveryState::Confirmed,
        }
    }

    /// A locally-originated pending message awaiting its echo.
    pub fn optimistic(
        room_id: RoomId,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        echo_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            echo_id: echo_id.into(),
            room_id,
            sender_id: sender_id.into(),
            content: content.into(),
            sent_at: Utc::now(),
            delivery: DeliveryState::Pending,
        }
    }

    /// Total order within a room: (sent_at, server id), server id breaking
    /// ties. Pending messages sort after confirmed ones at the same instant.
    pub fn sort_key(&self) -> (DateTime<Utc>, i64) {
        (self.sent_at, self.id.unwrap_or(i64::MAX))
    }
}

/// Paginated history envelope returned by `GET /history/{room_id}`.
/// `page` counts backward from the newest messages; `last` means no older
/// pages remain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub content: Vec<WireMessage>,
    pub page: u32,
    pub size: u32,
    pub total_pages: u32,
    pub last: bool,
}
