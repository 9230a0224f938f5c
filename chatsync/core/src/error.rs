//! Engine Errors
//!
//! Failures surfaced to callers of the facade and the async client.
//! Connection-level failures are normally recovered by the reconnect loop and
//! reported through connection status; only the conditions below reach a
//! caller directly.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors returned by the synchronization facade and client
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A message was submitted while the channel is not open
    #[error("not connected, message not sent")]
    NotConnected,

    /// The submitted text was empty after trimming
    #[error("message is empty")]
    EmptyMessage,

    /// The open channel refused the outbound frame
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The client task has shut down
    #[error("client has shut down")]
    ClientClosed,
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        Self::ConnectionFailure(err.to_string())
    }
}
