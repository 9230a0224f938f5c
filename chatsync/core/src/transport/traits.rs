//! Transport Traits
//!
//! Core trait definitions for the message channel.
//!
//! A [`Transport`] knows how to open channels against an address. Each opened
//! [`Channel`] can send text frames and be closed; everything it observes
//! (open, inbound frames, errors, close) is reported asynchronously through an
//! [`EventSink`] tagged with the channel's [`ChannelId`].

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;

/// Identifies one opened channel
///
/// Allocated by the supervisor, monotonically increasing per session, so
/// events from a channel that has since been replaced can be recognised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan_{}", self.0)
    }
}

/// Lifecycle and data events observed on a channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The underlying connection is established
    Opened,
    /// An inbound text payload
    Frame(String),
    /// A transport error; the close event that follows is authoritative
    Error(String),
    /// The connection is gone
    Closed {
        /// Close code, when the peer sent one
        code: Option<u16>,
        /// Close reason (may be empty)
        reason: String,
    },
}

/// A [`ChannelEvent`] tagged with the channel it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEnvelope {
    /// Originating channel
    pub channel: ChannelId,
    /// What happened
    pub event: ChannelEvent,
}

/// Receiving half of the channel event stream
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEnvelope>;

/// Where a channel reports its events
#[derive(Clone, Debug)]
pub struct EventSink {
    channel: ChannelId,
    tx: mpsc::UnboundedSender<ChannelEnvelope>,
}

impl EventSink {
    /// Create a sink that tags events with `channel`
    #[must_use]
    pub fn new(channel: ChannelId, tx: mpsc::UnboundedSender<ChannelEnvelope>) -> Self {
        Self { channel, tx }
    }

    /// The channel this sink reports for
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Report an event; returns false once the engine has gone away
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(ChannelEnvelope {
                channel: self.channel,
                event,
            })
            .is_ok()
    }

    /// Report an error followed by a close
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.emit(ChannelEvent::Error(error.clone()));
        self.emit(ChannelEvent::Closed {
            code: None,
            reason: error,
        });
    }
}

/// Errors that can occur during transport operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The address could not be used to open a channel
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The channel is closed and cannot carry frames
    #[error("channel closed")]
    ChannelClosed,

    /// The channel rejected the frame
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Opens channels against an address
pub trait Transport: Send + Sync {
    /// Start opening a channel
    ///
    /// Must return immediately. The outcome of the connection attempt is
    /// reported through `sink` (`Opened`, or `Error` followed by `Closed`).
    fn open(&self, address: &str, sink: EventSink) -> Result<Box<dyn Channel>, TransportError>;
}

/// One opened (or opening) channel
pub trait Channel: Send {
    /// Queue a text frame for transmission
    fn send(&mut self, payload: String) -> Result<(), TransportError>;

    /// Close the channel
    ///
    /// Idempotent. The channel reports one final `Closed` once its connection
    /// is released, possibly after this call returns; other events it emits
    /// afterwards may be ignored.
    fn close(&mut self);
}
