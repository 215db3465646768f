//! Subscription multiplexing.
//!
//! Decides which channels ride on the session's single connection. USER
//! sessions hold at most one room-detail subscription (the open
//! conversation) plus the unread-total channel; OPERATOR sessions hold one
//! per visible room plus the room-list and unread-total channels. The
//! whole active set is replayed on every (re)connection, account channels
//! first and rooms in ascending id order so resubscription is
//! deterministic.

use std::collections::BTreeMap;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::{Role, RoomId};

use super::protocol::{Channel, ClientFrame};

/// Capability token for one room subscription. Holding a handle proves the
/// subscription was established; `is_active` observes teardown. Dropping a
/// handle does not unsubscribe — unsubscription is an explicit operation.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    channel: Channel,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.channel.room_id()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

pub struct SubscriptionMultiplexer {
    role: Role,
    /// Active room subscriptions, ordered by room id for deterministic
    /// replay.
    rooms: RwLock<BTreeMap<RoomId, SubscriptionHandle>>,
    outbound: mpsc::Sender<ClientFrame>,
}

impl SubscriptionMultiplexer {
    pub fn new(role: Role, outbound: mpsc::Sender<ClientFrame>) -> Self {
        Self {
            role,
            rooms: RwLock::new(BTreeMap::new()),
            outbound,
        }
    }

    /// The account-level channels this session always carries.
    pub fn account_channels(&self) -> Vec<Channel> {
        match self.role {
            Role::User => vec![Channel::UnreadTotal],
            Role::Operator => vec![Channel::RoomList, Channel::UnreadTotal],
        }
    }

    /// Subscribe a room's message channel. Idempotent: an already-active
    /// room returns its existing handle. In USER mode the previous room
    /// (if any) is unsubscribed first — an adopter has one open
    /// conversation at a time.
    pub async fn subscribe(&self, room_id: RoomId) -> SubscriptionHandle {
        let mut rooms = self.rooms.write().await;
        if let Some(handle) = rooms.get(&room_id) {
            return handle.clone();
        }

        if self.role == Role::User {
            let previous: Vec<RoomId> = rooms.keys().copied().collect();
            for prev in previous {
                if let Some(handle) = rooms.remove(&prev) {
                    handle.cancel.cancel();
                    debug!(room = prev, "single-room policy, unsubscribing previous");
                    self.send(ClientFrame::unsubscribe(&handle.channel)).await;
                }
            }
        }

        let channel = Channel::RoomMessages(room_id);
        let handle = SubscriptionHandle {
            channel,
            cancel: CancellationToken::new(),
        };
        rooms.insert(room_id, handle.clone());
        self.send(ClientFrame::subscribe(&channel)).await;
        debug!(room = room_id, "subscribed");
        handle
    }

    /// Unsubscribe a room. Idempotent; frames for the room are dropped by
    /// the dispatcher from here on.
    pub async fn unsubscribe(&self, room_id: RoomId) {
        let mut rooms = self.rooms.write().await;
        if let Some(handle) = rooms.remove(&room_id) {
            handle.cancel.cancel();
            self.send(ClientFrame::unsubscribe(&handle.channel)).await;
            debug!(room = room_id, "unsubscribed");
        }
    }

    /// Whether frames for a room should still be routed.
    pub async fn is_room_active(&self, room_id: RoomId) -> bool {
        self.rooms.read().await.contains_key(&room_id)
    }

    /// The active room set, ascending.
    pub async fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().copied().collect()
    }

    /// Re-issue the entire active set after a (re)connection: account
    /// channels first, then rooms in ascending id order. Subscriptions are
    /// idempotent server-side, so replaying an already-subscribed channel
    /// is harmless.
    pub async fn replay(&self) {
        for channel in self.account_channels() {
            self.send(ClientFrame::subscribe(&channel)).await;
        }
        let rooms = self.rooms.read().await;
        for channel in rooms.values().map(|h| h.channel) {
            self.send(ClientFrame::subscribe(&channel)).await;
        }
        debug!(rooms = rooms.len(), "subscription set replayed");
    }

    async fn send(&self, frame: ClientFrame) {
        if self.outbound.send(frame).await.is_err() {
            warn!("outbound channel closed, dropping subscription frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mux(role: Role) -> (SubscriptionMultiplexer, mpsc::Receiver<ClientFrame>) {
        let (tx, rx) = mpsc::channel(64);
        (SubscriptionMultiplexer::new(role, tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ClientFrame>) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn destinations(frames: &[ClientFrame]) -> Vec<String> {
        frames
            .iter()
            .map(|f| match f {
                ClientFrame::Subscribe { destination } => format!("+{destination}"),
                ClientFrame::Unsubscribe { destination } => format!("-{destination}"),
                ClientFrame::Publish { destination, .. } => format!("!{destination}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let (mux, mut rx) = mux(Role::Operator);
        let first = mux.subscribe(7).await;
        let second = mux.subscribe(7).await;
        assert_eq!(first.channel(), second.channel());
        assert_eq!(mux.active_rooms().await, vec![7]);
        // Only one Subscribe frame went out
        assert_eq!(
            destinations(&drain(&mut rx)),
            vec!["+/topic/rooms/7/messages"]
        );
    }

    #[tokio::test]
    async fn user_mode_keeps_at_most_one_room() {
        let (mux, mut rx) = mux(Role::User);
        mux.subscribe(3).await;
        mux.subscribe(9).await;

        assert_eq!(mux.active_rooms().await, vec![9]);
        assert!(!mux.is_room_active(3).await);
        assert_eq!(
            destinations(&drain(&mut rx)),
            vec![
                "+/topic/rooms/3/messages",
                "-/topic/rooms/3/messages",
                "+/topic/rooms/9/messages",
            ]
        );
    }

    #[tokio::test]
    async fn operator_mode_accumulates_rooms() {
        let (mux, _rx) = mux(Role::Operator);
        mux.subscribe(9).await;
        mux.subscribe(3).await;
        mux.subscribe(5).await;
        assert_eq!(mux.active_rooms().await, vec![3, 5, 9]);
    }

    #[tokio::test]
    async fn unsubscribe_cancels_the_handle() {
        let (mux, mut rx) = mux(Role::Operator);
        let handle = mux.subscribe(7).await;
        assert!(handle.is_active());

        mux.unsubscribe(7).await;
        assert!(!handle.is_active());
        assert!(!mux.is_room_active(7).await);
        assert_eq!(
            destinations(&drain(&mut rx)),
            vec!["+/topic/rooms/7/messages", "-/topic/rooms/7/messages"]
        );
    }

    #[tokio::test]
    async fn unsubscribe_unknown_room_is_a_noop() {
        let (mux, mut rx) = mux(Role::Operator);
        mux.unsubscribe(99).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn replay_is_ordered_and_complete_for_operator() {
        let (mux, mut rx) = mux(Role::Operator);
        mux.subscribe(9).await;
        mux.subscribe(3).await;
        drain(&mut rx);

        mux.replay().await;
        assert_eq!(
            destinations(&drain(&mut rx)),
            vec![
                "+/user/queue/rooms",
                "+/user/queue/unread",
                "+/topic/rooms/3/messages",
                "+/topic/rooms/9/messages",
            ]
        );
    }

    #[tokio::test]
    async fn replay_for_user_has_single_account_channel() {
        let (mux, mut rx) = mux(Role::User);
        mux.subscribe(7).await;
        drain(&mut rx);

        mux.replay().await;
        assert_eq!(
            destinations(&drain(&mut rx)),
            vec!["+/user/queue/unread", "+/topic/rooms/7/messages"]
        );
    }

    #[tokio::test]
    async fn replayed_set_equals_pre_disconnect_set() {
        let (mux, mut rx) = mux(Role::Operator);
        mux.subscribe(5).await;
        mux.subscribe(2).await;
        mux.unsubscribe(5).await;
        mux.subscribe(8).await;
        let before = mux.active_rooms().await;
        drain(&mut rx);

        // Disconnect does not clear the active set; replay restores it.
        mux.replay().await;
        let replayed: Vec<RoomId> = drain(&mut rx)
            .iter()
            .filter_map(|f| match f {
                ClientFrame::Subscribe { destination } => {
                    Channel::parse(destination).and_then(|c| c.room_id())
                }
                _ => None,
            })
            .collect();
        assert_eq!(replayed, before);
        assert_eq!(replayed, vec![2, 8]);
    }
}
