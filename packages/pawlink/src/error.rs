use thiserror::Error;

use crate::models::RoomId;

/// Error taxonomy for the messaging layer.
///
/// `Transport` feeds the reconnect state machine and is never fatal to the
/// process. `Auth` is handed to the session collaborator and not retried
/// here. `HistoryFetch` is surfaced without automatic retry so a degraded
/// backend is not hammered with request storms.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected; session must re-authenticate")]
    Auth,

    #[error("history fetch failed for room {room_id}: {reason}")]
    HistoryFetch { room_id: RoomId, reason: String },

    #[error("no echo within the send window for message {echo_id} in room {room_id}")]
    SendTimeout { room_id: RoomId, echo_id: String },

    #[error("{candidates} pending messages match an echo in room {room_id}; matched the oldest")]
    ReconciliationAmbiguity { room_id: RoomId, candidates: usize },

    #[error("rejected push frame: {0}")]
    Frame(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::http::StatusCode;

        // A rejected handshake is the one place the transport signals auth
        // failure; everything else feeds the reconnect loop.
        if let tokio_tungstenite::tungstenite::Error::Http(resp) = &e {
            if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
                return ChatError::Auth;
            }
        }
        ChatError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_actionable() {
        let e = ChatError::SendTimeout {
            room_id: 7,
            echo_id: "e-1".into(),
        };
        let text = e.to_string();
        assert!(text.contains("room 7"));
        assert!(text.contains("e-1"));

        let e = ChatError::HistoryFetch {
            room_id: 3,
            reason: "connection refused".into(),
        };
        assert!(e.to_string().contains("connection refused"));
    }

    #[test]
    fn http_401_maps_to_auth() {
        use tokio_tungstenite::tungstenite::http::{Response, StatusCode};

        let resp = Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(None)
            .unwrap();
        let err: ChatError = tokio_tungstenite::tungstenite::Error::Http(Box::new(resp)).into();
        assert!(matches!(err, ChatError::Auth));
    }

    #[test]
    fn http_500_maps_to_transport() {
        use tokio_tungstenite::tungstenite::http::{Response, StatusCode};

        let resp = Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(None)
            .unwrap();
        let err: ChatError = tokio_tungstenite::tungstenite::Error::Http(Box::new(resp)).into();
        assert!(matches!(err, ChatError::Transport(_)));
    }
}
