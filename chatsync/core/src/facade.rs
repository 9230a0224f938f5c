//! Synchronization Facade
//!
//! Composes the Connection Supervisor, Message Ledger and Reveal Scheduler
//! into the single interface a rendering layer consumes.
//!
//! # Architecture
//!
//! ```text
//!   submit(text) ──▶ SyncFacade ──send──▶ ConnectionSupervisor ──▶ Channel
//!                       │  ▲                        │
//!                       │  └──── frames ────────────┘
//!                       ▼
//!                  MessageLedger ──observe──▶ RevealScheduler
//!                       │                          │
//!                       └──────── display_list ◀───┘
//! ```
//!
//! The facade is sans-IO: it never reads the clock and never spawns. The
//! owner feeds it channel events and the current instant, and wakes it at
//! [`SyncFacade::next_deadline`]. [`crate::client::ChatClient`] is the tokio
//! owner; tests drive it directly with hand-advanced instants.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::SyncError;
use crate::ledger::MessageLedger;
use crate::messages::{DisplayRecord, MessageId, MessageRecord, MessageRole};
use crate::reveal::{RevealConfig, RevealScheduler};
use crate::supervisor::{
    ConnectionState, ConnectionStatus, ConnectionSupervisor, ReconnectPolicy, SupervisorOutput,
};
use crate::transport::frame::{self, OutboundFrame};
use crate::transport::{ChannelEnvelope, ChannelEvents, Transport};

/// Engine tuning, overridable at construction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncConfig {
    /// Reconnect bounds
    pub reconnect: ReconnectPolicy,
    /// Reveal cadence
    pub reveal: RevealConfig,
}

/// Point-in-time view of the whole engine
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// Connection status
    pub status: ConnectionStatus,
    /// Consecutive reconnect attempts
    pub attempt: u32,
    /// Last human-readable failure
    pub last_error: Option<String>,
    /// Display list in ledger order
    pub messages: Vec<DisplayRecord>,
}

/// The engine
pub struct SyncFacade {
    supervisor: ConnectionSupervisor,
    ledger: MessageLedger,
    reveal: RevealScheduler,
}

impl SyncFacade {
    /// Create an engine for an already-resolved address
    ///
    /// Returns the receiver on which channel events arrive; the owner passes
    /// each one to [`SyncFacade::handle_channel_event`].
    pub fn new(
        address: impl Into<String>,
        config: SyncConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, ChannelEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let facade = Self {
            supervisor: ConnectionSupervisor::new(address, config.reconnect, transport, events_tx),
            ledger: MessageLedger::new(),
            reveal: RevealScheduler::new(config.reveal),
        };
        (facade, events_rx)
    }

    /// Open the channel if not already connecting or open
    pub fn connect(&mut self, now: Instant) {
        self.supervisor.connect(now);
    }

    /// Close the channel without reconnecting
    pub fn disconnect(&mut self) {
        self.supervisor.disconnect();
    }

    /// Send user text and echo it into the ledger
    ///
    /// # Errors
    ///
    /// [`SyncError::EmptyMessage`] if `text` is blank, [`SyncError::NotConnected`]
    /// if the channel is not open. Neither appends nor transmits anything.
    pub fn submit(&mut self, text: &str, now: Instant) -> Result<MessageId, SyncError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        self.send_frame(OutboundFrame::user(trimmed), now)
    }

    /// Send an arbitrary outbound frame and echo it into the ledger
    ///
    /// # Errors
    ///
    /// See [`ConnectionSupervisor::send`].
    pub fn send_frame(&mut self, outbound: OutboundFrame, now: Instant) -> Result<MessageId, SyncError> {
        self.supervisor.send(&outbound)?;

        let id = self.ledger.claim_sequential_id();
        let record = MessageRecord::new(id.clone(), outbound.role(), outbound.content, Utc::now());
        self.record(record, now);
        Ok(id)
    }

    /// Apply one channel event
    ///
    /// Returns true if the observable state may have changed.
    pub fn handle_channel_event(&mut self, envelope: ChannelEnvelope, now: Instant) -> bool {
        let before = self.supervisor.state().clone();
        match self.supervisor.handle_event(envelope, now) {
            SupervisorOutput::Frame(raw) => {
                self.ingest(&raw, now);
                true
            }
            SupervisorOutput::None => *self.supervisor.state() != before,
        }
    }

    fn ingest(&mut self, raw: &str, now: Instant) {
        let record = match frame::decode(raw) {
            Ok(inbound) => {
                let id = match inbound.id {
                    Some(id) => self.ledger.resolve_server_id(MessageId(id)),
                    None => self.ledger.claim_sequential_id(),
                };
                MessageRecord::new(id, inbound.role, inbound.content, Utc::now())
                    .with_auxiliary(inbound.auxiliary)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Recovering malformed frame as raw text");
                let arrived = Utc::now();
                MessageRecord::new(
                    self.ledger.claim_id(MessageId::raw(arrived, self.ledger.len())),
                    MessageRole::Text,
                    raw,
                    arrived,
                )
            }
        };
        self.record(record, now);
    }

    fn record(&mut self, record: MessageRecord, now: Instant) {
        let id = record.id.clone();
        let outcome = self.ledger.append(record);
        tracing::trace!(id = %id, outcome = ?outcome, "Ledger append");

        if let Some(stored) = self.ledger.get(&id) {
            self.reveal.observe(&id, stored.role, stored.char_len(), now);
        }
    }

    /// Fire every timer due at or before `now`
    ///
    /// Returns true if the observable state may have changed.
    pub fn poll_timers(&mut self, now: Instant) -> bool {
        let before = self.supervisor.state().clone();
        self.supervisor.poll_reconnect(now);
        let revealed = self.reveal.tick(now, &self.ledger);
        revealed || *self.supervisor.state() != before
    }

    /// Earliest pending reveal tick or reconnect
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.reveal.next_deadline(), self.supervisor.reconnect_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Outstanding timers: one per revealing message plus a pending reconnect
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.reveal.pending_timers() + usize::from(self.supervisor.reconnect_deadline().is_some())
    }

    /// Whether a transport channel is held
    #[must_use]
    pub fn is_transport_active(&self) -> bool {
        self.supervisor.has_channel()
    }

    /// One display record per ledger record, in ledger order
    #[must_use]
    pub fn display_list(&self) -> Vec<DisplayRecord> {
        self.ledger
            .records()
            .iter()
            .map(|record| {
                let (content, revealing) = match self.reveal.view(&record.id, &record.content) {
                    Some(view) => (view.text.to_string(), view.revealing),
                    None => (record.content.clone(), false),
                };
                DisplayRecord {
                    id: record.id.clone(),
                    role: record.role,
                    content,
                    revealing,
                    auxiliary: record.auxiliary.clone(),
                    timestamp: record.timestamp,
                }
            })
            .collect()
    }

    /// Connection state plus display list
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        let state = self.connection();
        SyncSnapshot {
            status: state.status,
            attempt: state.attempt,
            last_error: state.last_error.clone(),
            messages: self.display_list(),
        }
    }

    /// Connection state
    #[must_use]
    pub fn connection(&self) -> &ConnectionState {
        self.supervisor.state()
    }

    /// Connection status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.supervisor.status()
    }

    /// Last human-readable failure
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.supervisor.state().last_error.as_deref()
    }

    /// The ledger (read-only)
    #[must_use]
    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    /// The reveal scheduler (read-only)
    #[must_use]
    pub fn reveal(&self) -> &RevealScheduler {
        &self.reveal
    }

    /// Cancel every timer and close the channel for good
    pub fn dispose(&mut self) {
        self.reveal.cancel_all();
        self.supervisor.dispose();
        tracing::debug!(records = self.ledger.len(), "Engine disposed");
    }
}
