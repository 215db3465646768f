//! Client façade.
//!
//! Owns the connection, the dispatcher, and every store, and exposes the
//! operations a UI drives: the cancelable open-room pipeline, sends and
//! resends, backward pagination, focus, hide, and snapshot reads.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PawConfig;
use crate::directory::RoomDirectory;
use crate::error::{ChatError, Result};
use crate::models::{Message, Room, RoomId, Session, SubjectId};
use crate::rest::ApiClient;
use crate::store::MessageStore;
use crate::unread::UnreadCounter;
use crate::ws::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::ws::dispatch::{DispatchContext, Event, spawn_dispatcher};
use crate::ws::protocol::ClientFrame;
use crate::ws::subscription::{SubscriptionHandle, SubscriptionMultiplexer};

pub struct ChatClient {
    session: Session,
    config: PawConfig,
    api: ApiClient,
    conn: Arc<ConnectionManager>,
    subs: Arc<SubscriptionMultiplexer>,
    store: Arc<MessageStore>,
    unread: Arc<UnreadCounter>,
    directory: Arc<RoomDirectory>,
    dispatch_tx: mpsc::Sender<Event>,
    /// Handed to the run loop on the first `connect()` call.
    outbound_rx: std::sync::Mutex<Option<mpsc::Receiver<ClientFrame>>>,
    cancel: CancellationToken,
}

impl ChatClient {
    /// Build a client for one authenticated session. Allocates the
    /// serialized dispatch queue and the outbound frame channel internally;
    /// nothing touches the network until `connect()`.
    pub fn new(session: Session, config: PawConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<ClientFrame>(256);
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<Event>(256);
        let cancel = CancellationToken::new();

        let api = ApiClient::new(config.base_url.clone(), session.auth_token.clone());
        let conn = Arc::new(ConnectionManager::new(
            config.ws_url.clone(),
            session.auth_token.clone(),
            config.reconnect.clone(),
        ));
        let subs = Arc::new(SubscriptionMultiplexer::new(
            session.role,
            outbound_tx.clone(),
        ));
        let store = Arc::new(MessageStore::new(config.send.echo_window));
        let unread = Arc::new(UnreadCounter::new(session.user_id.clone()));
        let directory = Arc::new(RoomDirectory::new());

        spawn_dispatcher(
            DispatchContext {
                session: session.clone(),
                store: Arc::clone(&store),
                unread: Arc::clone(&unread),
                directory: Arc::clone(&directory),
                subs: Arc::clone(&subs),
                outbound: outbound_tx,
                tx: dispatch_tx.clone(),
                fail_timeout: config.send.fail_timeout,
            },
            dispatch_rx,
            cancel.child_token(),
        );

        Self {
            session,
            config,
            api,
            conn,
            subs,
            store,
            unread,
            directory,
            dispatch_tx,
            outbound_rx: std::sync::Mutex::new(Some(outbound_rx)),
            cancel,
        }
    }

    /// Start the push connection. Subsequent calls are no-ops; the run
    /// loop reconnects on its own until `disconnect()`.
    pub fn connect(&self) {
        let rx = self.outbound_rx.lock().expect("lock poisoned").take();
        if let Some(rx) = rx {
            info!(user = %self.session.user_id, "starting push connection");
            self.conn.connect(rx, self.dispatch_tx.clone());
        }
    }

    /// Tear down the session: stops the connection (terminal), the
    /// dispatcher, and any in-flight pipeline.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        self.conn.disconnect().await;
    }

    /// The connect → subscribe → fetch pipeline for one animal listing:
    /// get or create its room, subscribe the room channel, open the room
    /// server-side (resets unread), focus it, and load the newest history
    /// page. Cancelable at every step; a failed step leaves the state of
    /// completed steps intact.
    pub async fn open_room(&self, subject_id: SubjectId) -> Result<Room> {
        let summary = self.guarded(self.api.room_for_subject(subject_id)).await??;
        let room_id = summary.id;
        debug!(subject = subject_id, room = room_id, "room resolved");
        self.enqueue(Event::RoomResolved(summary)).await?;

        self.subs.subscribe(room_id).await;

        let opened = self.guarded(self.api.open_room(room_id)).await??;
        self.enqueue(Event::RoomResolved(opened.clone())).await?;
        self.enqueue(Event::Focus(Some(room_id))).await?;

        let page = self
            .guarded(self.api.history(room_id, 0, self.config.history.page_size))
            .await??;
        self.enqueue(Event::HistoryPage { room_id, page }).await?;

        Ok(Room::from(opened))
    }

    /// Optimistically send a message. Returns the echo id identifying the
    /// pending entry; delivery progress shows up in `messages()` snapshots.
    pub async fn send_message(&self, room_id: RoomId, content: &str) -> Result<String> {
        let echo_id = uuid::Uuid::new_v4().to_string();
        self.enqueue(Event::LocalSend {
            room_id,
            content: content.to_string(),
            echo_id: echo_id.clone(),
        })
        .await?;
        Ok(echo_id)
    }

    /// Explicitly re-append a FAILED message. Never automatic.
    pub async fn resend(&self, room_id: RoomId, echo_id: &str) -> Result<()> {
        self.enqueue(Event::Resend {
            room_id,
            echo_id: echo_id.to_string(),
        })
        .await
    }

    /// Fetch the next older history page for a room. Returns whether more
    /// pages remain. A failed fetch leaves previously loaded pages intact
    /// and is surfaced without retry.
    pub async fn load_older(&self, room_id: RoomId) -> Result<bool> {
        let Some(page_no) = self.store.next_page(room_id).await else {
            return Ok(false);
        };
        let page = self
            .guarded(
                self.api
                    .history(room_id, page_no, self.config.history.page_size),
            )
            .await??;
        let more = !page.last;
        self.enqueue(Event::HistoryPage { room_id, page }).await?;
        Ok(more)
    }

    /// Focus a room: subscribe it (per role policy), mark it read
    /// server-side, and zero its local count.
    pub async fn focus_room(&self, room_id: RoomId) -> Result<SubscriptionHandle> {
        let handle = self.subs.subscribe(room_id).await;
        let opened = self.guarded(self.api.open_room(room_id)).await??;
        self.enqueue(Event::RoomResolved(opened)).await?;
        self.enqueue(Event::Focus(Some(room_id))).await?;
        Ok(handle)
    }

    /// Unfocus: unread counts become fully authoritative again. The room
    /// subscription is kept (operators keep visible rooms live; a user's
    /// room is replaced on the next `open_room`/`focus_room`).
    pub async fn unfocus(&self) -> Result<()> {
        self.enqueue(Event::Focus(None)).await
    }

    /// Drop a room's subscription; its frames are discarded from here on.
    pub async fn unsubscribe_room(&self, room_id: RoomId) {
        self.subs.unsubscribe(room_id).await;
    }

    /// Full directory reload from the rooms-list collaborator.
    pub async fn refresh_rooms(&self) -> Result<()> {
        let rooms = self.guarded(self.api.rooms()).await??;
        self.enqueue(Event::RoomsRefreshed(rooms)).await
    }

    /// Re-sync the global unread total from REST (the push channel keeps
    /// it fresh afterwards).
    pub async fn refresh_unread(&self) -> Result<()> {
        let total = self.guarded(self.api.unread_count()).await??;
        self.enqueue(Event::Frame(crate::ws::protocol::PushFrame::UnreadTotal { total }))
            .await
    }

    /// Soft-hide a room for this user and stop listening to it.
    pub async fn hide_room(&self, room_id: RoomId) -> Result<()> {
        self.guarded(self.api.hide_room(room_id)).await??;
        self.subs.unsubscribe(room_id).await;
        self.enqueue(Event::Hidden(room_id)).await
    }

    // ── Snapshot reads (consistent, any time) ───────────────────────────

    pub async fn messages(&self, room_id: RoomId) -> Vec<Message> {
        self.store.messages(room_id).await
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.directory.rooms().await
    }

    pub async fn unread_total(&self) -> u32 {
        self.unread.displayed_total().await
    }

    pub async fn room_unread(&self, room_id: RoomId) -> u32 {
        self.unread.per_room(room_id).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.conn.state().await
    }

    /// State transitions and auth notifications, for the connection
    /// indicator and the session collaborator's re-auth flow.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.conn.subscribe_events()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // ── internals ───────────────────────────────────────────────────────

    /// Run one pipeline step unless the client is being torn down.
    async fn guarded<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ChatError::Cancelled),
            value = fut => Ok(value),
        }
    }

    async fn enqueue(&self, event: Event) -> Result<()> {
        self.dispatch_tx
            .send(event)
            .await
            .map_err(|_| ChatError::Transport("dispatcher stopped".to_string()))
    }
}
