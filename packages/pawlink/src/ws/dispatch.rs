//! Serialized event dispatch.
//!
//! Every mutation of the message store, the unread counters, and the room
//! directory funnels through one task processing events in arrival order:
//! inbound transport frames, REST completions, timer expiries, and local
//! user actions. No two mutations ever run concurrently against the same
//! store; UI reads take snapshots at any time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::directory::RoomDirectory;
use crate::error::ChatError;
use crate::models::{HistoryPage, RoomId, RoomSummary, Session};
use crate::store::{AppendOutcome, MessageStore};
use crate::unread::UnreadCounter;

use super::protocol::{ClientFrame, PushFrame};
use super::subscription::SubscriptionMultiplexer;

/// Everything the dispatcher serializes. Frames come from the transport;
/// the rest are REST completions, timer expiries, and local user actions
/// re-delivered onto this queue before touching state.
#[derive(Debug)]
pub enum Event {
    /// An inbound push frame, already validated at ingress.
    Frame(PushFrame),
    /// The transport (re)connected; replay the subscription set.
    Connected,
    /// `GET /rooms` completed.
    RoomsRefreshed(Vec<RoomSummary>),
    /// A single-room REST call (get-or-create, open) completed.
    RoomResolved(RoomSummary),
    /// A history page fetch completed.
    HistoryPage { room_id: RoomId, page: HistoryPage },
    /// Local user action: send a message (optimistic append + publish).
    LocalSend {
        room_id: RoomId,
        content: String,
        echo_id: String,
    },
    /// Local user action: re-append a FAILED message.
    Resend { room_id: RoomId, echo_id: String },
    /// Local user action: focus a room (or unfocus with `None`).
    Focus(Option<RoomId>),
    /// Local user action: hide a room (REST call already done).
    Hidden(RoomId),
    /// A pending message's failure timer expired.
    SendTimedOut { room_id: RoomId, echo_id: String },
}

/// Shared context the dispatcher routes over. Owned by the ChatClient,
/// mutated only from the dispatch task.
pub(crate) struct DispatchContext {
    pub session: Session,
    pub store: Arc<MessageStore>,
    pub unread: Arc<UnreadCounter>,
    pub directory: Arc<RoomDirectory>,
    pub subs: Arc<SubscriptionMultiplexer>,
    pub outbound: mpsc::Sender<ClientFrame>,
    /// Self-enqueue handle for timer completions.
    pub tx: mpsc::Sender<Event>,
    pub fail_timeout: Duration,
}

/// Spawn the dispatch task. It drains the queue until the client is torn
/// down or every sender is gone.
pub(crate) fn spawn_dispatcher(
    ctx: DispatchContext,
    mut rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => handle_event(&ctx, event).await,
                    None => break,
                },
            }
        }
        debug!("dispatcher stopped");
    })
}

pub(crate) async fn handle_event(ctx: &DispatchContext, event: Event) {
    match event {
        Event::Frame(PushFrame::Message { room_id, message }) => {
            if !ctx.subs.is_room_active(room_id).await {
                debug!(room = room_id, "dropping frame for unsubscribed room");
                return;
            }
            let sender_id = message.sender_id.clone();
            let sent_at = message.sent_at;
            match ctx.store.append_incoming(message).await {
                AppendOutcome::Duplicate => {
                    debug!(room = room_id, "duplicate server message, ignored");
                }
                AppendOutcome::Reconciled { echo_id, candidates } => {
                    if candidates > 1 {
                        let err = ChatError::ReconciliationAmbiguity {
                            room_id,
                            candidates,
                        };
                        warn!(%err, echo_id = %echo_id, "echo matched more than one pending send");
                    }
                    ctx.directory.touch_last_message(room_id, sent_at).await;
                }
                AppendOutcome::Inserted => {
                    ctx.directory.touch_last_message(room_id, sent_at).await;
                    ctx.unread.on_message(room_id, &sender_id, sent_at).await;
                }
            }
        }

        Event::Frame(PushFrame::RoomChanged { room }) => {
            ctx.unread.on_room_unread(room.id, room.unread_count).await;
            ctx.directory.apply_room_event(room).await;
        }

        Event::Frame(PushFrame::UnreadTotal { total }) => {
            ctx.unread.on_server_total(total).await;
        }

        Event::Connected => {
            ctx.subs.replay().await;
        }

        Event::RoomsRefreshed(rooms) => {
            for room in &rooms {
                ctx.unread.on_room_unread(room.id, room.unread_count).await;
            }
            ctx.directory.set_all(rooms).await;
        }

        Event::RoomResolved(room) => {
            // Directory only: the unread counter is driven by the focus
            // event and the push channels, not by room lookups.
            ctx.directory.apply_room_event(room).await;
        }

        Event::HistoryPage { room_id, page } => {
            ctx.store.merge_page(room_id, &page).await;
        }

        Event::LocalSend {
            room_id,
            content,
            echo_id,
        } => {
            local_send(ctx, room_id, content, echo_id).await;
        }

        Event::Resend { room_id, echo_id } => {
            // Explicit user action only: consume the FAILED entry and
            // re-append it as a fresh pending send under a new echo id.
            match ctx.store.remove_failed(room_id, &echo_id).await {
                Some(failed) => {
                    let fresh_echo = uuid::Uuid::new_v4().to_string();
                    local_send(ctx, room_id, failed.content, fresh_echo).await;
                }
                None => {
                    warn!(
                        room = room_id,
                        echo_id = %echo_id,
                        "resend requested for a message that is not failed"
                    );
                }
            }
        }

        Event::Focus(Some(room_id)) => {
            ctx.unread.on_room_focus(room_id).await;
            ctx.directory.set_unread(room_id, 0).await;
        }

        Event::Focus(None) => {
            ctx.unread.on_unfocus().await;
        }

        Event::Hidden(room_id) => {
            ctx.directory.hide(room_id).await;
        }

        Event::SendTimedOut { room_id, echo_id } => {
            if ctx.store.mark_failed(room_id, &echo_id).await {
                let err = ChatError::SendTimeout {
                    room_id,
                    echo_id: echo_id.clone(),
                };
                warn!(%err, "pending message failed");
            }
        }
    }
}

async fn local_send(ctx: &DispatchContext, room_id: RoomId, content: String, echo_id: String) {
    let (_message, token) = ctx
        .store
        .append_optimistic(room_id, &ctx.session.user_id, &content, &echo_id)
        .await;

    let frame = ClientFrame::publish(room_id, &content, &echo_id);
    if ctx.outbound.send(frame).await.is_err() {
        warn!(room = room_id, "outbound channel closed, publish dropped");
    }

    // The failure timer: canceled by the store when the echo reconciles,
    // otherwise it re-enters the queue as a timer completion.
    let tx = ctx.tx.clone();
    let timeout = ctx.fail_timeout;
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                let _ = tx.send(Event::SendTimedOut { room_id, echo_id }).await;
            }
        }
    });
}
