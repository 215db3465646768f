//! Room directory.
//!
//! The authoritative list of this session's rooms: full reloads from the
//! REST collaborator, incremental upserts from room-list push frames, and
//! the soft per-user hide flag. Mutation goes through the dispatcher;
//! reads are snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{Room, RoomId, RoomSummary, Visibility};

pub struct RoomDirectory {
    rooms: RwLock<HashMap<RoomId, Room>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the directory wholesale with a fresh server listing.
    pub async fn set_all(&self, summaries: Vec<RoomSummary>) {
        let mut rooms = self.rooms.write().await;
        rooms.clear();
        for summary in summaries {
            rooms.insert(summary.id, Room::from(summary));
        }
        debug!(count = rooms.len(), "room directory reloaded");
    }

    /// Incremental upsert from a room-list push: last-message time, unread
    /// count, and hide/restore all arrive as a full room snapshot.
    pub async fn apply_room_event(&self, summary: RoomSummary) {
        let mut rooms = self.rooms.write().await;
        rooms.insert(summary.id, Room::from(summary));
    }

    /// Bump a room's last-message time, monotonically.
    pub async fn touch_last_message(&self, room_id: RoomId, sent_at: DateTime<Utc>) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&room_id) {
            if room.last_message_at.is_none_or(|t| t < sent_at) {
                room.last_message_at = Some(sent_at);
            }
        }
    }

    pub async fn set_unread(&self, room_id: RoomId, count: u32) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&room_id) {
            room.unread_count = count;
        }
    }

    /// Soft per-user delete. The room stays in the directory; it just
    /// stops appearing in `rooms()`.
    pub async fn hide(&self, room_id: RoomId) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&room_id) {
            room.visibility = Visibility::Hidden;
            debug!(room = room_id, "room hidden");
        }
    }

    pub async fn get(&self, room_id: RoomId) -> Option<Room> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    /// Visible rooms, most recently active first. Rooms that never had a
    /// message sort last.
    pub async fn rooms(&self) -> Vec<Room> {
        let rooms = self.rooms.read().await;
        let mut visible: Vec<Room> = rooms
            .values()
            .filter(|r| r.visibility == Visibility::Active)
            .cloned()
            .collect();
        visible.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then(a.id.cmp(&b.id))
        });
        visible
    }

    /// Every room including hidden ones.
    pub async fn all_rooms(&self) -> Vec<Room> {
        self.rooms.read().await.values().cloned().collect()
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}
