//! Async Chat Client
//!
//! Drives a [`SyncFacade`] on a single tokio task.
//!
//! # Architecture
//!
//! ```text
//!  ChatClient handles ──commands──▶ ┌──────────────────────────┐
//!                                   │ engine task              │
//!  Transport channel ───events────▶ │  select! {               │
//!                                   │    channel event         │
//!                                   │    command               │
//!                                   │    sleep_until(deadline) │
//!                                   │  }                       │
//!                                   └────────────┬─────────────┘
//!                                                │ watch
//!                                                ▼
//!                                           SyncSnapshot
//! ```
//!
//! Every mutation of engine state happens on that one task, so network events
//! and reveal ticks are applied strictly in the order they are processed.
//! Renderers read snapshots and never touch the engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::error::SyncError;
use crate::facade::{SyncConfig, SyncFacade, SyncSnapshot};
use crate::messages::MessageId;
use crate::transport::{ChannelEvents, Transport};

/// What was left running when the engine shut down
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Reveal and reconnect timers still pending
    pub pending_timers: usize,
    /// Whether a transport channel was still held
    pub transport_active: bool,
}

enum Command {
    Connect,
    Disconnect,
    Submit {
        text: String,
        reply: oneshot::Sender<Result<MessageId, SyncError>>,
    },
    Shutdown {
        reply: oneshot::Sender<ShutdownReport>,
    },
}

/// Handle to a running engine task
///
/// Cloneable; the engine is disposed on [`ChatClient::shutdown`] or when the
/// last handle is dropped.
#[derive(Clone, Debug)]
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SyncSnapshot>,
}

impl ChatClient {
    /// Spawn the engine task and issue the initial connect
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(address: impl Into<String>, config: SyncConfig, transport: Arc<dyn Transport>) -> Self {
        let (facade, events) = SyncFacade::new(address, config, transport);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(facade.snapshot());

        tokio::spawn(run_engine(facade, events, commands_rx, snapshot_tx));

        Self {
            commands: commands_tx,
            snapshots: snapshot_rx,
        }
    }

    /// Spawn an engine talking WebSocket, configured from a [`ClientConfig`](crate::config::ClientConfig)
    #[cfg(feature = "websocket")]
    pub fn spawn_websocket(config: &crate::config::ClientConfig) -> Self {
        let transport = crate::transport::WebSocketTransport::new(config.connect_timeout);
        Self::spawn(config.address(), config.sync, Arc::new(transport))
    }

    /// Request a connect (no effect while connecting or open)
    ///
    /// # Errors
    ///
    /// [`SyncError::ClientClosed`] if the engine has shut down.
    pub fn connect(&self) -> Result<(), SyncError> {
        self.commands
            .send(Command::Connect)
            .map_err(|_| SyncError::ClientClosed)
    }

    /// Close the channel without reconnecting
    ///
    /// # Errors
    ///
    /// [`SyncError::ClientClosed`] if the engine has shut down.
    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.commands
            .send(Command::Disconnect)
            .map_err(|_| SyncError::ClientClosed)
    }

    /// Submit user text
    ///
    /// # Errors
    ///
    /// See [`SyncFacade::submit`]; [`SyncError::ClientClosed`] if the engine
    /// has shut down.
    pub async fn submit(&self, text: impl Into<String>) -> Result<MessageId, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                text: text.into(),
                reply,
            })
            .map_err(|_| SyncError::ClientClosed)?;
        rx.await.map_err(|_| SyncError::ClientClosed)?
    }

    /// Latest published state
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    /// Dispose the engine and report what was left running
    ///
    /// # Errors
    ///
    /// [`SyncError::ClientClosed`] if the engine had already shut down.
    pub async fn shutdown(self) -> Result<ShutdownReport, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .map_err(|_| SyncError::ClientClosed)?;
        rx.await.map_err(|_| SyncError::ClientClosed)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "Connect"),
            Self::Disconnect => write!(f, "Disconnect"),
            Self::Submit { text, .. } => write!(f, "Submit({} chars)", text.chars().count()),
            Self::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

async fn run_engine(
    mut facade: SyncFacade,
    mut events: ChannelEvents,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<SyncSnapshot>,
) {
    tracing::debug!("Engine task started");
    facade.connect(Instant::now());
    publish(&facade, &snapshots);

    loop {
        let deadline = facade.next_deadline();

        let changed = tokio::select! {
            Some(envelope) = events.recv() => facade.handle_channel_event(envelope, Instant::now()),
            command = commands.recv() => match command {
                Some(Command::Connect) => {
                    facade.connect(Instant::now());
                    true
                }
                Some(Command::Disconnect) => {
                    facade.disconnect();
                    true
                }
                Some(Command::Submit { text, reply }) => {
                    let result = facade.submit(&text, Instant::now());
                    if let Err(ref e) = result {
                        tracing::debug!(error = %e, "Submit rejected");
                    }
                    let _ = reply.send(result);
                    true
                }
                Some(Command::Shutdown { reply }) => {
                    let report = dispose(&mut facade, &snapshots);
                    let _ = reply.send(report);
                    return;
                }
                None => {
                    dispose(&mut facade, &snapshots);
                    return;
                }
            },
            () = sleep_until(deadline) => facade.poll_timers(Instant::now()),
        };

        if changed {
            publish(&facade, &snapshots);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn dispose(facade: &mut SyncFacade, snapshots: &watch::Sender<SyncSnapshot>) -> ShutdownReport {
    facade.dispose();
    publish(facade, snapshots);

    let report = ShutdownReport {
        pending_timers: facade.pending_timers(),
        transport_active: facade.is_transport_active(),
    };
    tracing::info!(
        pending_timers = report.pending_timers,
        transport_active = report.transport_active,
        "Engine shut down"
    );
    report
}

fn publish(facade: &SyncFacade, snapshots: &watch::Sender<SyncSnapshot>) {
    let next = facade.snapshot();
    snapshots.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}
