//! Loopback Transport
//!
//! In-process channels with a scriptable server side. Used when the remote
//! assistant lives in the same process, and by tests to drive the engine
//! through connection loss and recovery without a network.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, server) = LoopbackTransport::new_pair();
//! let client = ChatClient::spawn("loopback://chat", SyncConfig::default(), Arc::new(transport));
//!
//! server.push_json(serde_json::json!({"id": "m1", "type": "stream", "content": "Hi"}));
//! server.close_active("maintenance");
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::traits::{Channel, ChannelEvent, ChannelId, EventSink, Transport, TransportError};

/// How the server side answers new connection attempts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AcceptPolicy {
    /// Open immediately
    #[default]
    Accept,
    /// Fail with the given error, then close
    Refuse(String),
    /// Leave the attempt pending until the server decides
    Hold,
}

#[derive(Debug)]
struct Connection {
    sink: EventSink,
    address: String,
    sent: Vec<String>,
    open: bool,
    closing: bool,
    closed: bool,
}

impl Connection {
    fn finish_close(&mut self, code: u16, reason: impl Into<String>) -> bool {
        self.closing = false;
        self.closed = true;
        self.sink.emit(ChannelEvent::Closed {
            code: Some(code),
            reason: reason.into(),
        })
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    policy: AcceptPolicy,
    defer_close: bool,
    connections: Vec<Connection>,
}

impl LoopbackState {
    fn latest_live(&mut self) -> Option<&mut Connection> {
        self.connections
            .iter_mut()
            .rev()
            .find(|c| !c.closed && !c.closing)
    }
}

/// Client side of the loopback pair
#[derive(Clone, Debug)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

/// Server side of the loopback pair
#[derive(Clone, Debug)]
pub struct LoopbackServer {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    /// Create a connected transport/server pair
    #[must_use]
    pub fn new_pair() -> (Self, LoopbackServer) {
        let state = Arc::new(Mutex::new(LoopbackState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            LoopbackServer { state },
        )
    }
}

impl Transport for LoopbackTransport {
    fn open(&self, address: &str, sink: EventSink) -> Result<Box<dyn Channel>, TransportError> {
        if address.is_empty() {
            return Err(TransportError::InvalidAddress("empty address".to_string()));
        }

        let mut state = self.state.lock();
        let channel = sink.channel();
        let mut connection = Connection {
            sink,
            address: address.to_string(),
            sent: Vec::new(),
            open: false,
            closing: false,
            closed: false,
        };

        match state.policy.clone() {
            AcceptPolicy::Accept => {
                connection.open = true;
                connection.sink.emit(ChannelEvent::Opened);
            }
            AcceptPolicy::Refuse(reason) => {
                connection.closed = true;
                connection.sink.fail(reason);
            }
            AcceptPolicy::Hold => {}
        }

        state.connections.push(connection);
        Ok(Box::new(LoopbackChannel {
            state: Arc::clone(&self.state),
            channel,
        }))
    }
}

struct LoopbackChannel {
    state: Arc<Mutex<LoopbackState>>,
    channel: ChannelId,
}

impl Channel for LoopbackChannel {
    fn send(&mut self, payload: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let connection = state
            .connections
            .iter_mut()
            .find(|c| c.sink.channel() == self.channel)
            .ok_or(TransportError::ChannelClosed)?;

        if connection.closed || connection.closing || !connection.open {
            return Err(TransportError::ChannelClosed);
        }
        connection.sent.push(payload);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        let defer = state.defer_close;
        if let Some(connection) = state
            .connections
            .iter_mut()
            .find(|c| c.sink.channel() == self.channel && !c.closed && !c.closing)
        {
            if defer {
                connection.closing = true;
            } else {
                connection.finish_close(1000, "closed by client");
            }
        }
    }
}

impl LoopbackServer {
    /// Change how future connection attempts are answered
    pub fn set_policy(&self, policy: AcceptPolicy) {
        self.state.lock().policy = policy;
    }

    /// Leave client-initiated closes pending until [`LoopbackServer::finish_closing`]
    pub fn set_close_deferred(&self, defer: bool) {
        self.state.lock().defer_close = defer;
    }

    /// Complete every pending client-initiated close; returns how many
    pub fn finish_closing(&self) -> usize {
        let mut state = self.state.lock();
        state
            .connections
            .iter_mut()
            .filter(|c| c.closing)
            .map(|c| c.finish_close(1000, "closed by client"))
            .count()
    }

    /// Open the most recent held connection
    pub fn accept_pending(&self) -> bool {
        let mut state = self.state.lock();
        match state.latest_live() {
            Some(connection) if !connection.open => {
                connection.open = true;
                connection.sink.emit(ChannelEvent::Opened)
            }
            _ => false,
        }
    }

    /// Deliver a raw text frame on the live connection
    pub fn push_frame(&self, raw: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        match state.latest_live() {
            Some(connection) if connection.open => {
                connection.sink.emit(ChannelEvent::Frame(raw.into()))
            }
            _ => false,
        }
    }

    /// Deliver a JSON frame on the live connection
    pub fn push_json(&self, value: Value) -> bool {
        self.push_frame(value.to_string())
    }

    /// Report a transport error without closing
    pub fn inject_error(&self, error: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        match state.latest_live() {
            Some(connection) => connection.sink.emit(ChannelEvent::Error(error.into())),
            None => false,
        }
    }

    /// Drop the live connection from the server side
    pub fn close_active(&self, reason: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        match state.latest_live() {
            Some(connection) => connection.finish_close(1006, reason),
            None => false,
        }
    }

    /// Every frame the client sent, across all connections, in order
    #[must_use]
    pub fn sent_frames(&self) -> Vec<String> {
        self.state
            .lock()
            .connections
            .iter()
            .flat_map(|c| c.sent.iter().cloned())
            .collect()
    }

    /// Number of connection attempts seen so far
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Number of connections not yet closed by either side
    ///
    /// A connection whose close is still pending counts as live.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.state
            .lock()
            .connections
            .iter()
            .filter(|c| !c.closed)
            .count()
    }

    /// Address used by the most recent connection attempt
    #[must_use]
    pub fn last_address(&self) -> Option<String> {
        self.state
            .lock()
            .connections
            .last()
            .map(|c| c.address.clone())
    }
}
