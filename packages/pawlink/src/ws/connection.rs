//! Connection lifecycle.
//!
//! One WebSocket per session, shared by every room. The manager owns the
//! connect/disconnect/reconnect state machine: transport errors feed an
//! exponential-backoff retry loop, a rejected handshake (401/403) stops
//! retrying and notifies the session collaborator, and `disconnect()` is
//! terminal for the session.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectConfig;
use crate::error::ChatError;

use super::dispatch::Event;
use super::protocol::{ClientFrame, decode_frame};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle state as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Notifications for the connection-state indicator and the session
/// collaborator.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    State(ConnectionState),
    /// The handshake was rejected with 401/403; re-authentication is the
    /// session collaborator's job, not ours.
    AuthRequired,
}

/// Why one connected session ended.
enum SessionEnd {
    Cancelled,
    Transport,
}

pub struct ConnectionManager {
    ws_url: String,
    auth_token: String,
    reconnect: ReconnectConfig,
    state: Arc<RwLock<ConnectionState>>,
    events: broadcast::Sender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    pub fn new(ws_url: String, auth_token: String, reconnect: ReconnectConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            ws_url,
            auth_token,
            reconnect,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Current state snapshot.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Subscribe to state transitions and auth notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Start the connection run loop. Consumes the outbound frame channel;
    /// inbound frames and (re)connection signals go to the dispatcher.
    pub fn connect(
        self: &Arc<Self>,
        outbound_rx: mpsc::Receiver<ClientFrame>,
        dispatch_tx: mpsc::Sender<Event>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run(outbound_rx, dispatch_tx).await;
        })
    }

    /// Cancel any in-flight connection or pending retry and force
    /// DISCONNECTED. Terminal for this session.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        self.set_state(ConnectionState::Disconnected).await;
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!(?next, "connection state change");
            *state = next;
            let _ = self.events.send(ConnectionEvent::State(next));
        }
    }

    async fn run(
        &self,
        mut outbound_rx: mpsc::Receiver<ClientFrame>,
        dispatch_tx: mpsc::Sender<Event>,
    ) {
        // Consecutive failures since the last healthy session; drives the
        // backoff exponent.
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting).await;

            match self.open().await {
                Ok(ws) => {
                    attempt = 0;
                    info!(url = %self.ws_url, "connected");
                    self.set_state(ConnectionState::Connected).await;
                    // Dispatcher replays the subscription set on every
                    // (re)connection.
                    if dispatch_tx.send(Event::Connected).await.is_err() {
                        break;
                    }

                    match self.serve(ws, &mut outbound_rx, &dispatch_tx).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Transport => {
                            warn!("transport dropped, reconnecting");
                            attempt = 1;
                        }
                    }
                }
                Err(ChatError::Auth) => {
                    error!("handshake rejected, re-authentication required");
                    let _ = self.events.send(ConnectionEvent::AuthRequired);
                    break;
                }
                Err(e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "connect failed");
                    if let Some(max) = self.reconnect.max_attempts {
                        if attempt >= max {
                            error!(attempt, "giving up after repeated connect failures");
                            break;
                        }
                    }
                }
            }

            self.set_state(ConnectionState::Reconnecting).await;
            let delay = backoff_delay(attempt, &self.reconnect);
            debug!(attempt, ?delay, "backing off before reconnect");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
    }

    /// One handshake attempt, with the session bearer credential attached.
    async fn open(&self) -> crate::error::Result<Ws> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.auth_token))
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _resp) = connect_async(request).await?;
        Ok(ws)
    }

    /// Drive one connected session: drain outbound frames into the sink,
    /// validate inbound frames at ingress and hand them to the dispatcher.
    async fn serve(
        &self,
        ws: Ws,
        outbound_rx: &mut mpsc::Receiver<ClientFrame>,
        dispatch_tx: &mpsc::Sender<Event>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.close().await;
                    return SessionEnd::Cancelled;
                }

                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        // All senders dropped: the client is being torn down.
                        let _ = sink.close().await;
                        return SessionEnd::Cancelled;
                    };
                    let text = match serde_json::to_string(&frame) {
                        Ok(t) => t,
                        Err(e) => {
                            error!(error = %e, "failed to serialize outbound frame");
                            continue;
                        }
                    };
                    if sink.send(Message::text(text)).await.is_err() {
                        return SessionEnd::Transport;
                    }
                }

                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            match decode_frame(text.as_str()) {
                                Ok(frame) => {
                                    if dispatch_tx.send(Event::Frame(frame)).await.is_err() {
                                        return SessionEnd::Cancelled;
                                    }
                                }
                                Err(e) => {
                                    // Never trust ambient structure: log and drop.
                                    warn!(error = %e, "dropping unrecognized push frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("server closed the stream");
                            return SessionEnd::Transport;
                        }
                        Some(Ok(_)) => {
                            // Ping/pong and binary frames are connection
                            // plumbing, not application frames.
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "read error");
                            return SessionEnd::Transport;
                        }
                    }
                }
            }
        }
    }
}

/// Exponential backoff: base × 2^(attempt-1), capped.
fn backoff_delay(attempt: u32, cfg: &ReconnectConfig) -> std::time::Duration {
    let exp = attempt.saturating_sub(1).min(6);
    cfg.base_delay.saturating_mul(1 << exp).min(cfg.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg() -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }

    #[test]
    fn backoff_doubles_from_base() {
        let cfg = cfg();
        assert_eq!(backoff_delay(1, &cfg), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, &cfg), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, &cfg), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, &cfg), Duration::from_secs(8));
        assert_eq!(backoff_delay(5, &cfg), Duration::from_secs(16));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let cfg = cfg();
        assert_eq!(backoff_delay(6, &cfg), Duration::from_secs(30));
        assert_eq!(backoff_delay(60, &cfg), Duration::from_secs(30));
    }

    #[test]
    fn backoff_respects_custom_base() {
        let cfg = ReconnectConfig {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        };
        assert_eq!(backoff_delay(1, &cfg), Duration::from_millis(250));
        assert_eq!(backoff_delay(3, &cfg), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn initial_state_is_disconnected() {
        let mgr = ConnectionManager::new("ws://127.0.0.1:1/ws".into(), "tok".into(), cfg());
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_terminal_and_broadcast() {
        let mgr = Arc::new(ConnectionManager::new(
            // Nothing listens here; the run loop would retry forever.
            "ws://127.0.0.1:9/ws".into(),
            "tok".into(),
            cfg(),
        ));
        let mut events = mgr.subscribe_events();

        let (_outbound_tx, outbound_rx) = mpsc::channel(8);
        let (dispatch_tx, _dispatch_rx) = mpsc::channel(8);
        let handle = mgr.connect(outbound_rx, dispatch_tx);

        // Let the run loop actually start before tearing it down.
        for _ in 0..200 {
            if mgr.state().await != ConnectionState::Disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_ne!(mgr.state().await, ConnectionState::Disconnected);

        mgr.disconnect().await;
        let _ = handle.await;
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);

        // The event stream saw a Disconnected transition at some point.
        let mut saw_disconnected = false;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, ConnectionEvent::State(ConnectionState::Disconnected)) {
                saw_disconnected = true;
            }
        }
        assert!(saw_disconnected);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mgr = Arc::new(ConnectionManager::new(
            // Closed port: connects fail fast.
            "ws://127.0.0.1:9/ws".into(),
            "tok".into(),
            ReconnectConfig {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
                max_attempts: Some(2),
            },
        ));
        let (_outbound_tx, outbound_rx) = mpsc::channel(8);
        let (dispatch_tx, _dispatch_rx) = mpsc::channel(8);
        let handle = mgr.connect(outbound_rx, dispatch_tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run loop should stop on its own")
            .unwrap();
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
    }
}
