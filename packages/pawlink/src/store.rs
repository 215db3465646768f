//! Per-room message logs.
//!
//! Merges three sources into one totally-ordered log per room: history
//! pages from the REST collaborator, realtime pushes, and optimistic local
//! sends. Owns reconciliation of pending messages against their server
//! echoes. All mutation is driven by the dispatcher; reads are snapshots.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{DeliveryState, HistoryPage, Message, RoomId, WireMessage};

/// Result of feeding one incoming server message into a room's log.
#[derive(Debug)]
pub enum AppendOutcome {
    /// New server message, inserted in order.
    Inserted,
    /// Server id already present — idempotent replay, log unchanged.
    Duplicate,
    /// Matched a pending local message, which was confirmed in place.
    /// `candidates` counts how many pending entries the fallback matcher
    /// considered plausible; more than one is an ambiguity the caller
    /// should surface.
    Reconciled { echo_id: String, candidates: usize },
}

struct RoomLog {
    entries: Vec<Message>,
    /// Server ids present in `entries`; the idempotency check.
    ids: HashSet<i64>,
    /// Failure timers for pending messages, keyed by echo id. Reconciling
    /// or failing an entry removes (and cancels) its token — whichever
    /// happens first wins, so a message is never both confirmed and failed.
    pending: HashMap<String, CancellationToken>,
    /// Next server-side history page to fetch (backward from newest).
    next_page: u32,
    exhausted: bool,
}

impl RoomLog {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            ids: HashSet::new(),
            pending: HashMap::new(),
            next_page: 0,
            exhausted: false,
        }
    }

    fn insert_ordered(&mut self, message: Message) {
        let key = message.sort_key();
        let pos = self.entries.partition_point(|m| m.sort_key() <= key);
        self.entries.insert(pos, message);
    }

    /// Find the pending entry an incoming message confirms, if any.
    /// Exact echo-id match wins; otherwise fall back to (sender, content,
    /// time window). Returns (entry index, plausible candidate count).
    fn match_pending(&self, incoming: &WireMessage, window: chrono::Duration) -> Option<(usize, usize)> {
        if let Some(echo_id) = &incoming.echo_id {
            if self.pending.contains_key(echo_id) {
                let idx = self
                    .entries
                    .iter()
                    .position(|m| m.delivery == DeliveryState::Pending && &m.echo_id == echo_id)?;
                return Some((idx, 1));
            }
        }

        let candidates: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.delivery == DeliveryState::Pending
                    && m.sender_id == incoming.sender_id
                    && m.content == incoming.content
                    && within_window(m.sent_at, incoming.sent_at, window)
            })
            .map(|(i, _)| i)
            .collect();

        // Entries are time-ordered, so the first candidate is the oldest
        // pending send — the deterministic pick when ambiguous.
        candidates.first().map(|&idx| (idx, candidates.len()))
    }
}

fn within_window(a: DateTime<Utc>, b: DateTime<Utc>, window: chrono::Duration) -> bool {
    let delta = if a > b { a - b } else { b - a };
    delta <= window
}

/// All room logs for one session.
pub struct MessageStore {
    rooms: RwLock<HashMap<RoomId, RoomLog>>,
    echo_window: chrono::Duration,
}

impl MessageStore {
    pub fn new(echo_window: Duration) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            echo_window: chrono::Duration::from_std(echo_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
        }
    }

    /// Insert an incoming server message, maintaining sort order.
    /// Re-delivery of an already-seen server id is a no-op. A message that
    /// confirms a pending local send replaces that entry in place (same
    /// position keeps ordering) and cancels its failure timer.
    pub async fn append_incoming(&self, incoming: WireMessage) -> AppendOutcome {
        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(incoming.room_id).or_insert_with(RoomLog::new);

        if log.ids.contains(&incoming.id) {
            return AppendOutcome::Duplicate;
        }

        if let Some((idx, candidates)) = log.match_pending(&incoming, self.echo_window) {
            let echo_id = log.entries[idx].echo_id.clone();
            if let Some(token) = log.pending.remove(&echo_id) {
                token.cancel();
            }
            let entry = &mut log.entries[idx];
            entry.id = Some(incoming.id);
            entry.sent_at = incoming.sent_at;
            entry.delivery = DeliveryState::Confirmed;
            log.ids.insert(incoming.id);
            return AppendOutcome::Reconciled { echo_id, candidates };
        }

        log.ids.insert(incoming.id);
        log.insert_ordered(Message::from_wire(incoming));
        AppendOutcome::Inserted
    }

    /// Append a locally-originated message as PENDING. Returns the entry
    /// and the cancellation token guarding its failure timer; the caller
    /// (the dispatcher) owns starting that timer.
    pub async fn append_optimistic(
        &self,
        room_id: RoomId,
        sender_id: &str,
        content: &str,
        echo_id: &str,
    ) -> (Message, CancellationToken) {
        let message = Message::optimistic(room_id, sender_id, content, echo_id);
        let token = CancellationToken::new();

        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(room_id).or_insert_with(RoomLog::new);
        log.pending.insert(echo_id.to_string(), token.clone());
        log.insert_ordered(message.clone());
        (message, token)
    }

    /// PENDING → FAILED, exactly once. Returns false if the message was
    /// already reconciled (or already failed), in which case nothing
    /// changes.
    pub async fn mark_failed(&self, room_id: RoomId, echo_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(log) = rooms.get_mut(&room_id) else {
            return false;
        };
        let Some(token) = log.pending.remove(echo_id) else {
            return false;
        };
        token.cancel();
        if let Some(entry) = log
            .entries
            .iter_mut()
            .find(|m| m.echo_id == echo_id && m.delivery == DeliveryState::Pending)
        {
            entry.delivery = DeliveryState::Failed;
            true
        } else {
            false
        }
    }

    /// Remove a FAILED entry so an explicit resend can re-append it fresh.
    pub async fn remove_failed(&self, room_id: RoomId, echo_id: &str) -> Option<Message> {
        let mut rooms = self.rooms.write().await;
        let log = rooms.get_mut(&room_id)?;
        let idx = log
            .entries
            .iter()
            .position(|m| m.echo_id == echo_id && m.delivery == DeliveryState::Failed)?;
        Some(log.entries.remove(idx))
    }

    /// Merge one history page, deduplicating by server id, and advance the
    /// room's page cursor. The cursor tracks server-side position, so
    /// realtime inserts arriving between page fetches produce overlap
    /// (dropped here), never corruption. Returns how many entries were new.
    pub async fn merge_page(&self, room_id: RoomId, page: &HistoryPage) -> usize {
        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(room_id).or_insert_with(RoomLog::new);

        let mut inserted = 0;
        for wire in &page.content {
            if log.ids.contains(&wire.id) {
                continue;
            }
            log.ids.insert(wire.id);
            log.insert_ordered(Message::from_wire(wire.clone()));
            inserted += 1;
        }
        log.next_page = log.next_page.max(page.page + 1);
        if page.last {
            log.exhausted = true;
        }
        debug!(room = room_id, page = page.page, inserted, "merged history page");
        inserted
    }

    /// The next history page to fetch for a room, or `None` when the
    /// backward history is exhausted.
    pub async fn next_page(&self, room_id: RoomId) -> Option<u32> {
        let rooms = self.rooms.read().await;
        match rooms.get(&room_id) {
            Some(log) if log.exhausted => None,
            Some(log) => Some(log.next_page),
            None => Some(0),
        }
    }

    /// Consistent snapshot of a room's log, oldest first.
    pub async fn messages(&self, room_id: RoomId) -> Vec<Message> {
        self.rooms
            .read()
            .await
            .get(&room_id)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    pub async fn len(&self, room_id: RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(&room_id)
            .map(|log| log.entries.len())
            .unwrap_or(0)
    }
}
