//! The push side of the messaging layer: one WebSocket per session,
//! multiplexed across room and account channels, drained into a single
//! serialized dispatcher.

pub mod connection;
pub mod dispatch;
pub mod protocol;
pub mod subscription;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use dispatch::Event;
pub use protocol::{Channel, ClientFrame, PushFrame, decode_frame};
pub use subscription::{SubscriptionHandle, SubscriptionMultiplexer};
