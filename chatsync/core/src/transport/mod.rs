//! Transport Layer
//!
//! Provides the Transport Channel: one underlying socket that knows only how to
//! connect, send, receive and close.
//!
//! - `WebSocket`: the remote assistant over `ws://` / `wss://`
//! - `Loopback`: in-process channels with a scriptable server side
//!
//! # Design Philosophy
//!
//! Channels carry no lifecycle policy. Reconnection, status tracking and
//! error surfacing live in the [`ConnectionSupervisor`](crate::supervisor::ConnectionSupervisor);
//! a channel just reports what it observes through its [`EventSink`].

pub mod frame;
pub mod loopback;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;

// Re-exports for convenience
pub use frame::{FrameError, InboundFrame, OutboundFrame};
pub use loopback::{AcceptPolicy, LoopbackServer, LoopbackTransport};
pub use traits::{
    Channel, ChannelEnvelope, ChannelEvent, ChannelEvents, ChannelId, EventSink, Transport,
    TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
