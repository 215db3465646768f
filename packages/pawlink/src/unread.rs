//! Unread-count tracking.
//!
//! Per-room counts plus the account-wide total, reconciling the optimistic
//! zeroing done on room focus against the authoritative totals the server
//! pushes. Counts are unsigned and all arithmetic saturates, so no total
//! can ever go negative.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::RoomId;

struct FocusState {
    room_id: RoomId,
    /// The count that was optimistically zeroed on focus. Subtracted from
    /// server totals until the server itself reports the room as read.
    delta: u32,
    focused_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    per_room: HashMap<RoomId, u32>,
    server_total: u32,
    focus: Option<FocusState>,
}

/// Per-room and global unread counters for one session.
pub struct UnreadCounter {
    inner: RwLock<Inner>,
    /// This session's own user id; own messages never count as unread.
    user_id: String,
}

impl UnreadCounter {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            user_id: user_id.into(),
        }
    }

    /// Focusing a room optimistically zeroes its count and records the
    /// zeroed amount as the focus delta.
    pub async fn on_room_focus(&self, room_id: RoomId) {
        let mut inner = self.inner.write().await;
        let delta = inner.per_room.insert(room_id, 0).unwrap_or(0);
        debug!(room = room_id, delta, "room focused, count zeroed");
        inner.focus = Some(FocusState {
            room_id,
            delta,
            focused_at: Utc::now(),
        });
    }

    /// Unfocusing makes the totals fully authoritative again.
    pub async fn on_unfocus(&self) {
        self.inner.write().await.focus = None;
    }

    /// Authoritative global total from the server.
    pub async fn on_server_total(&self, total: u32) {
        self.inner.write().await.server_total = total;
    }

    /// Authoritative per-room count from a room-list push or refresh.
    ///
    /// For the focused room a non-zero push is presumed stale (it raced
    /// the focus) and the local zero stands; a zero push means the server
    /// has caught up, which also clears the focus delta.
    pub async fn on_room_unread(&self, room_id: RoomId, count: u32) {
        let mut inner = self.inner.write().await;
        let focused_here = matches!(&inner.focus, Some(f) if f.room_id == room_id);
        if focused_here {
            if count == 0 {
                if let Some(focus) = &mut inner.focus {
                    focus.delta = 0;
                }
                inner.per_room.insert(room_id, 0);
            }
        } else {
            inner.per_room.insert(room_id, count);
        }
    }

    /// A message arrived on a room channel. Counts only messages from the
    /// counterparty; for the focused room, only those strictly newer than
    /// the focus instant (redelivered older messages stay read).
    pub async fn on_message(&self, room_id: RoomId, sender_id: &str, sent_at: DateTime<Utc>) {
        if sender_id == self.user_id {
            return;
        }
        let mut inner = self.inner.write().await;
        if let Some(focus) = &inner.focus {
            if focus.room_id == room_id && sent_at <= focus.focused_at {
                return;
            }
        }
        *inner.per_room.entry(room_id).or_insert(0) += 1;
    }

    /// The account-wide total to display: the server total minus the
    /// focus delta while a room is focused, floored at zero.
    pub async fn displayed_total(&self) -> u32 {
        let inner = self.inner.read().await;
        match &inner.focus {
            Some(focus) => inner.server_total.saturating_sub(focus.delta),
            None => inner.server_total,
        }
    }

    pub async fn per_room(&self, room_id: RoomId) -> u32 {
        self.inner
            .read()
            .await
            .per_room
            .get(&room_id)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> UnreadCounter {
        UnreadCounter::new("me")
    }

    #[tokio::test]
    async fn focus_zeroes_room_and_offsets_total() {
        let c = counter();
        // Operator with 3 visible rooms, global total 5, one room at 2
        c.on_room_unread(1, 2).await;
        c.on_room_unread(2, 2).await;
        c.on_room_unread(3, 1).await;
        c.on_server_total(5).await;

        c.on_room_focus(1).await;
        assert_eq!(c.per_room(1).await, 0);
        assert_eq!(c.displayed_total().await, 3);
    }

    #[tokio::test]
    async fn displayed_total_never_negative() {
        let c = counter();
        c.on_room_unread(1, 10).await;
        c.on_server_total(4).await;
        c.on_room_focus(1).await;
        // delta (10) exceeds the server total (4): floor at zero
        assert_eq!(c.displayed_total().await, 0);
    }

    #[tokio::test]
    async fn stale_total_push_stays_offset_while_focused() {
        let c = counter();
        c.on_room_unread(1, 2).await;
        c.on_room_focus(1).await;
        // Server pushes a total that still includes the focused room
        c.on_server_total(5).await;
        assert_eq!(c.displayed_total().await, 3);
    }

    #[tokio::test]
    async fn unfocus_restores_authoritative_total() {
        let c = counter();
        c.on_room_unread(1, 2).await;
        c.on_server_total(5).await;
        c.on_room_focus(1).await;
        assert_eq!(c.displayed_total().await, 3);

        c.on_unfocus().await;
        assert_eq!(c.displayed_total().await, 5);
    }

    #[tokio::test]
    async fn server_reporting_zero_clears_the_delta() {
        let c = counter();
        c.on_room_unread(1, 2).await;
        c.on_server_total(5).await;
        c.on_room_focus(1).await;

        // The server processed the read-marking: focused room is at 0 and
        // the total no longer includes it
        c.on_room_unread(1, 0).await;
        c.on_server_total(3).await;
        assert_eq!(c.displayed_total().await, 3);
    }

    #[tokio::test]
    async fn stale_room_push_does_not_resurrect_focused_count() {
        let c = counter();
        c.on_room_unread(1, 2).await;
        c.on_room_focus(1).await;
        // Raced push still carrying the pre-focus count
        c.on_room_unread(1, 2).await;
        assert_eq!(c.per_room(1).await, 0);
    }

    #[tokio::test]
    async fn focused_room_stays_zero_for_older_messages() {
        let c = counter();
        c.on_room_focus(1).await;
        // Redelivered message from before the focus
        c.on_message(1, "shelter-1", Utc::now() - chrono::Duration::seconds(60))
            .await;
        assert_eq!(c.per_room(1).await, 0);
    }

    #[tokio::test]
    async fn focused_room_counts_strictly_newer_messages() {
        let c = counter();
        c.on_room_focus(1).await;
        c.on_message(1, "shelter-1", Utc::now() + chrono::Duration::seconds(1))
            .await;
        assert_eq!(c.per_room(1).await, 1);
    }

    #[tokio::test]
    async fn own_messages_never_count() {
        let c = counter();
        c.on_message(1, "me", Utc::now() + chrono::Duration::seconds(1))
            .await;
        c.on_room_focus(2).await;
        c.on_message(2, "me", Utc::now() + chrono::Duration::seconds(1))
            .await;
        assert_eq!(c.per_room(1).await, 0);
        assert_eq!(c.per_room(2).await, 0);
    }

    #[tokio::test]
    async fn unfocused_rooms_count_all_counterparty_messages() {
        let c = counter();
        c.on_room_focus(1).await;
        c.on_message(2, "shelter-1", Utc::now() - chrono::Duration::seconds(60))
            .await;
        c.on_message(2, "shelter-1", Utc::now()).await;
        assert_eq!(c.per_room(2).await, 2);
    }

    #[tokio::test]
    async fn refocus_replaces_the_delta() {
        let c = counter();
        c.on_room_unread(1, 2).await;
        c.on_room_unread(2, 3).await;
        c.on_server_total(5).await;

        c.on_room_focus(1).await;
        assert_eq!(c.displayed_total().await, 3);

        c.on_room_focus(2).await;
        assert_eq!(c.displayed_total().await, 2);
        assert_eq!(c.per_room(2).await, 0);
    }
}
