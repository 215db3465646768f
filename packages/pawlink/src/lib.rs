//! pawlink — the real-time messaging layer of a pet-adoption platform.
//!
//! Two asymmetric actors — an adopter and a shelter operator — exchange
//! messages tied to an animal listing over one persistent WebSocket per
//! session. This crate is the client side of that layer: connection
//! lifecycle with reconnect/backoff, room subscription multiplexing,
//! per-room ordered message logs with optimistic-send reconciliation,
//! unread-count synchronization, and the REST collaborators for room
//! metadata and paginated history.
//!
//! Entry point is [`ChatClient`]:
//!
//! ```no_run
//! use pawlink::{ChatClient, PawConfig, Role, Session};
//!
//! # async fn run() -> pawlink::Result<()> {
//! let session = Session::new("user-123", Role::User, "bearer-token");
//! let client = ChatClient::new(session, PawConfig::default());
//! client.connect();
//!
//! let room = client.open_room(42).await?;
//! client.send_message(room.id, "Is Luna still available?").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod models;
pub mod rest;
pub mod store;
pub mod unread;
pub mod ws;

pub use client::ChatClient;
pub use config::{FileConfig, PawConfig, load_config};
pub use directory::RoomDirectory;
pub use error::{ChatError, Result};
pub use models::{
    DeliveryState, HistoryPage, Message, Role, Room, RoomId, RoomSummary, Session, SubjectId,
    Visibility, WireMessage,
};
pub use rest::ApiClient;
pub use store::{AppendOutcome, MessageStore};
pub use unread::UnreadCounter;
pub use ws::{
    Channel, ClientFrame, ConnectionEvent, ConnectionManager, ConnectionState, PushFrame,
    SubscriptionHandle, SubscriptionMultiplexer,
};
