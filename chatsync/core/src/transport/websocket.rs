//! WebSocket Transport
//!
//! Channels over `ws://` / `wss://` using tokio-tungstenite.
//!
//! Each opened channel runs one socket task. The task owns the stream, forwards
//! inbound text to the [`EventSink`] and drains an outbound queue fed by
//! [`Channel::send`]. Closing the channel (even while still connecting) ends
//! the task, which reports `Closed` as its last event.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::traits::{Channel, ChannelEvent, EventSink, Transport, TransportError};

/// Default time allowed for the WebSocket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket channels
#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WebSocketTransport {
    /// Create a transport with the given handshake timeout
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Handshake timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, address: &str, sink: EventSink) -> Result<Box<dyn Channel>, TransportError> {
        if !(address.starts_with("ws://") || address.starts_with("wss://")) {
            return Err(TransportError::InvalidAddress(format!(
                "expected ws:// or wss:// URL, got {address:?}"
            )));
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(
            address.to_string(),
            self.connect_timeout,
            outgoing_rx,
            sink,
        ));

        Ok(Box::new(WebSocketChannel {
            outgoing: Some(outgoing_tx),
        }))
    }
}

enum Outgoing {
    Text(String),
    Close,
}

struct WebSocketChannel {
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
}

impl Channel for WebSocketChannel {
    fn send(&mut self, payload: String) -> Result<(), TransportError> {
        let tx = self.outgoing.as_ref().ok_or(TransportError::ChannelClosed)?;
        tx.send(Outgoing::Text(payload))
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn close(&mut self) {
        if let Some(tx) = self.outgoing.take() {
            let _ = tx.send(Outgoing::Close);
        }
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    url: String,
    connect_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    sink: EventSink,
) {
    tracing::debug!(url = %url, channel = %sink.channel(), "Opening WebSocket");

    let connect = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));
    let stream = tokio::select! {
        result = connect => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                sink.fail(format!("WebSocket connection error: {url}: {e}"));
                return;
            }
            Err(_) => {
                sink.fail(format!(
                    "WebSocket connection timed out after {}ms: {url}",
                    connect_timeout.as_millis()
                ));
                return;
            }
        },
        () = wait_for_close(&mut outgoing) => {
            tracing::debug!(url = %url, "WebSocket closed while connecting");
            sink.emit(ChannelEvent::Closed {
                code: None,
                reason: "closed by client".to_string(),
            });
            return;
        }
    };

    if !sink.emit(ChannelEvent::Opened) {
        return;
    }

    let (mut write, mut read) = stream.split();
    let mut close_code = None;
    let mut close_reason = String::new();

    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        sink.emit(ChannelEvent::Error(format!("WebSocket write error: {e}")));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    close_reason = "closed by client".to_string();
                    break;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if !sink.emit(ChannelEvent::Frame(text)) {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if !sink.emit(ChannelEvent::Frame(text)) {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        close_code = Some(u16::from(frame.code));
                        close_reason = frame.reason.into_owned();
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    sink.emit(ChannelEvent::Error(format!("WebSocket read error: {e}")));
                    break;
                }
                None => break,
            },
        }
    }

    tracing::debug!(url = %url, code = ?close_code, reason = %close_reason, "WebSocket closed");
    sink.emit(ChannelEvent::Closed {
        code: close_code,
        reason: close_reason,
    });
}

/// Resolves once the owner asks to close (or drops the channel)
async fn wait_for_close(outgoing: &mut mpsc::UnboundedReceiver<Outgoing>) {
    loop {
        match outgoing.recv().await {
            Some(Outgoing::Close) | None => return,
            // Frames queued before the handshake completes cannot be delivered.
            Some(Outgoing::Text(_)) => {}
        }
    }
}
