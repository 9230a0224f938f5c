//! Connection Supervisor
//!
//! Wraps the Transport Channel with lifecycle state and bounded, fixed-delay
//! automatic reconnection.
//!
//! # State Machine
//!
//! ```text
//!                 connect()
//!   Closed ─────────────────▶ Connecting ──Opened──▶ Open
//!     ▲  ▲                        │                   │
//!     │  │   Closed, attempt<max  │      Closed       │
//!     │  └── schedule reconnect ◀─┴───────────────────┘
//!     │      (attempt += 1, fixed delay)
//!     │
//!     └── Closed, attempt>=max: terminal error, dormant until connect()
//! ```
//!
//! The supervisor is sans-IO with respect to time: every operation that needs
//! the clock takes `now`, and the pending reconnect is a deadline the owner
//! drives through [`ConnectionSupervisor::poll_reconnect`]. At most one channel
//! is active; events from any other channel are ignored.
//!
//! A deliberately closed channel stays tracked until it reports `Closed`. A
//! `connect()` issued in the meantime waits in `Connecting` and opens the new
//! channel only when that report arrives, so two channels are never live at
//! once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::SyncError;
use crate::transport::frame::{self, OutboundFrame};
use crate::transport::{Channel, ChannelEnvelope, ChannelEvent, ChannelId, EventSink, Transport};

/// Default reconnect attempts before giving up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default fixed delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Reconnection bounds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive reconnect attempts allowed after an unexpected close
    pub max_attempts: u32,
    /// Fixed delay before each attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Connection lifecycle status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// A channel is being established
    Connecting,
    /// The channel is open
    Open,
    /// No channel is open
    #[default]
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Observable connection state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Current status
    pub status: ConnectionStatus,
    /// Consecutive reconnect attempts since the last successful open
    pub attempt: u32,
    /// Last human-readable failure, cleared on open
    pub last_error: Option<String>,
}

/// What the owner should do after a channel event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorOutput {
    /// Nothing further
    None,
    /// An inbound payload to hand to the ledger
    Frame(String),
}

struct ActiveChannel {
    id: ChannelId,
    handle: Box<dyn Channel>,
}

/// Connection lifecycle manager
pub struct ConnectionSupervisor {
    address: String,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    events_tx: mpsc::UnboundedSender<ChannelEnvelope>,
    state: ConnectionState,
    channel: Option<ActiveChannel>,
    closing: Option<ChannelId>,
    open_deferred: bool,
    reconnect_at: Option<Instant>,
    next_channel: u64,
    disposed: bool,
}

impl ConnectionSupervisor {
    /// Create a supervisor for `address`
    ///
    /// Channel events are delivered on `events_tx`; the owner feeds them back
    /// through [`ConnectionSupervisor::handle_event`].
    pub fn new(
        address: impl Into<String>,
        policy: ReconnectPolicy,
        transport: Arc<dyn Transport>,
        events_tx: mpsc::UnboundedSender<ChannelEnvelope>,
    ) -> Self {
        Self {
            address: address.into(),
            policy,
            transport,
            events_tx,
            state: ConnectionState::default(),
            channel: None,
            closing: None,
            open_deferred: false,
            reconnect_at: None,
            next_channel: 0,
            disposed: false,
        }
    }

    /// Target address
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    /// Whether a channel is currently held
    #[must_use]
    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Whether a deliberately closed channel has yet to report its close
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.is_some()
    }

    /// Pending reconnect deadline
    #[must_use]
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Externally requested connect
    ///
    /// No effect while a channel is connecting or open. Otherwise any pending
    /// reconnect is superseded, and if the supervisor had exhausted its
    /// attempts it starts a fresh bounded cycle. While a previous channel is
    /// still closing, the open is deferred until it reports `Closed`.
    pub fn connect(&mut self, now: Instant) {
        if self.disposed {
            tracing::warn!("connect() after dispose ignored");
            return;
        }
        if self.channel.is_some() || self.open_deferred {
            return;
        }
        if self.reconnect_at.take().is_none() && self.state.attempt >= self.policy.max_attempts {
            self.state.attempt = 0;
        }
        if let Some(closing) = self.closing {
            tracing::debug!(channel = %closing, "Connect deferred until previous channel closes");
            self.state.status = ConnectionStatus::Connecting;
            self.open_deferred = true;
            return;
        }
        self.open_channel(now);
    }

    /// Fire the pending reconnect if it is due
    pub fn poll_reconnect(&mut self, now: Instant) {
        match self.reconnect_at {
            Some(at) if at <= now => {
                self.reconnect_at = None;
                tracing::info!(
                    attempt = self.state.attempt,
                    max = self.policy.max_attempts,
                    address = %self.address,
                    "Reconnecting"
                );
                self.open_channel(now);
            }
            _ => {}
        }
    }

    fn open_channel(&mut self, now: Instant) {
        self.next_channel += 1;
        let id = ChannelId(self.next_channel);
        let sink = EventSink::new(id, self.events_tx.clone());

        self.state.status = ConnectionStatus::Connecting;
        match self.transport.open(&self.address, sink) {
            Ok(handle) => {
                tracing::debug!(channel = %id, address = %self.address, "Channel opening");
                self.channel = Some(ActiveChannel { id, handle });
            }
            Err(e) => {
                tracing::warn!(error = %e, address = %self.address, "Channel open failed");
                self.state.last_error = Some(format!("Connection failed: {e}"));
                self.on_closed(now);
            }
        }
    }

    /// Apply one channel event
    pub fn handle_event(&mut self, envelope: ChannelEnvelope, now: Instant) -> SupervisorOutput {
        let current = self.channel.as_ref().map(|c| c.id);
        if current != Some(envelope.channel) {
            if self.closing == Some(envelope.channel)
                && matches!(envelope.event, ChannelEvent::Closed { .. })
            {
                return self.on_previous_closed(now);
            }
            tracing::debug!(
                channel = %envelope.channel,
                event = ?envelope.event,
                "Ignoring event from inactive channel"
            );
            return SupervisorOutput::None;
        }

        match envelope.event {
            ChannelEvent::Opened => {
                tracing::info!(address = %self.address, "Connection open");
                self.state.status = ConnectionStatus::Open;
                self.state.attempt = 0;
                self.state.last_error = None;
                SupervisorOutput::None
            }
            ChannelEvent::Frame(raw) => SupervisorOutput::Frame(raw),
            ChannelEvent::Error(error) => {
                tracing::warn!(error = %error, address = %self.address, "Transport error");
                self.state.last_error = Some(error);
                SupervisorOutput::None
            }
            ChannelEvent::Closed { code, reason } => {
                tracing::info!(code = ?code, reason = %reason, "Connection closed");
                self.channel = None;
                self.on_closed(now);
                SupervisorOutput::None
            }
        }
    }

    fn on_previous_closed(&mut self, now: Instant) -> SupervisorOutput {
        if let Some(channel) = self.closing.take() {
            tracing::debug!(channel = %channel, "Previous channel closed");
        }
        if std::mem::take(&mut self.open_deferred) && !self.disposed {
            self.open_channel(now);
        }
        SupervisorOutput::None
    }

    fn on_closed(&mut self, now: Instant) {
        self.state.status = ConnectionStatus::Closed;

        if self.state.attempt < self.policy.max_attempts {
            self.state.attempt += 1;
            self.reconnect_at = Some(now + self.policy.delay);
            tracing::info!(
                attempt = self.state.attempt,
                max = self.policy.max_attempts,
                delay_ms = self.policy.delay.as_millis() as u64,
                "Reconnect scheduled"
            );
        } else {
            let message = format!(
                "Connection failed after {} reconnect attempts: {}",
                self.policy.max_attempts, self.address
            );
            tracing::error!(address = %self.address, "{}", message);
            self.state.last_error = Some(message);
        }
    }

    /// Serialize and transmit a frame on the open channel
    ///
    /// # Errors
    ///
    /// [`SyncError::NotConnected`] if the channel is not open (also recorded as
    /// `last_error`), or [`SyncError::ConnectionFailure`] if the channel
    /// rejects the frame.
    pub fn send(&mut self, outbound: &OutboundFrame) -> Result<(), SyncError> {
        let channel = match (&mut self.channel, self.state.status) {
            (Some(channel), ConnectionStatus::Open) => channel,
            _ => {
                self.state.last_error = Some("Not connected, message not sent".to_string());
                return Err(SyncError::NotConnected);
            }
        };

        let payload = frame::encode(outbound)?;
        if let Err(e) = channel.handle.send(payload) {
            tracing::warn!(error = %e, "Send failed");
            self.state.last_error = Some(format!("Send failed: {e}"));
            return Err(e.into());
        }
        Ok(())
    }

    /// Deliberate teardown
    ///
    /// Cancels any pending reconnect or deferred open and closes the active
    /// channel without entering the reconnect path. Terminal until
    /// `connect()`.
    pub fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.open_deferred = false;
        if let Some(mut channel) = self.channel.take() {
            tracing::info!(channel = %channel.id, "Disconnecting");
            channel.handle.close();
            self.closing = Some(channel.id);
        }
        self.state.status = ConnectionStatus::Closed;
    }

    /// Permanent teardown; later `connect()` calls are ignored
    pub fn dispose(&mut self) {
        self.disconnect();
        self.disposed = true;
    }

    /// Whether [`ConnectionSupervisor::dispose`] has run
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("address", &self.address)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("channel", &self.channel.as_ref().map(|c| c.id))
            .field("closing", &self.closing)
            .field("reconnect_at", &self.reconnect_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AcceptPolicy, ChannelEvents, LoopbackServer, LoopbackTransport};

    const DELAY: Duration = Duration::from_millis(3000);

    fn setup(policy: ReconnectPolicy) -> (ConnectionSupervisor, ChannelEvents, LoopbackServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (transport, server) = LoopbackTransport::new_pair();
        let supervisor = ConnectionSupervisor::new("loopback://chat", policy, Arc::new(transport), tx);
        (supervisor, rx, server)
    }

    fn pump(supervisor: &mut ConnectionSupervisor, rx: &mut ChannelEvents, now: Instant) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let SupervisorOutput::Frame(raw) = supervisor.handle_event(envelope, now) {
                frames.push(raw);
            }
        }
        frames
    }

    #[test]
    fn test_connect_opens() {
        let (mut supervisor, mut rx, _server) = setup(ReconnectPolicy::default());
        let now = Instant::now();

        supervisor.connect(now);
        assert_eq!(supervisor.status(), ConnectionStatus::Connecting);

        pump(&mut supervisor, &mut rx, now);
        assert_eq!(supervisor.status(), ConnectionStatus::Open);
        assert_eq!(supervisor.state().attempt, 0);
        assert!(supervisor.state().last_error.is_none());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        let now = Instant::now();

        supervisor.connect(now);
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);
        supervisor.connect(now);

        assert_eq!(server.open_count(), 1);
        assert_eq!(supervisor.status(), ConnectionStatus::Open);
    }

    #[test]
    fn test_frames_pass_through() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);

        server.push_frame("{\"type\":\"text\",\"content\":\"hi\"}");
        let frames = pump(&mut supervisor, &mut rx, now);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_error_does_not_close() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);

        server.inject_error("hiccup");
        pump(&mut supervisor, &mut rx, now);
        assert_eq!(supervisor.status(), ConnectionStatus::Open);
        assert_eq!(supervisor.state().last_error.as_deref(), Some("hiccup"));
    }

    #[test]
    fn test_unexpected_close_schedules_reconnect() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        let t0 = Instant::now();
        supervisor.connect(t0);
        pump(&mut supervisor, &mut rx, t0);

        server.close_active("gone");
        pump(&mut supervisor, &mut rx, t0);
        assert_eq!(supervisor.status(), ConnectionStatus::Closed);
        assert!(!supervisor.has_channel());
        assert_eq!(supervisor.state().attempt, 1);
        assert_eq!(supervisor.reconnect_deadline(), Some(t0 + DELAY));

        supervisor.poll_reconnect(t0 + DELAY - Duration::from_millis(1));
        assert_eq!(server.open_count(), 1);

        supervisor.poll_reconnect(t0 + DELAY);
        assert_eq!(server.open_count(), 2);
        pump(&mut supervisor, &mut rx, t0 + DELAY);
        assert_eq!(supervisor.status(), ConnectionStatus::Open);
        assert_eq!(supervisor.state().attempt, 0);
    }

    #[test]
    fn test_attempts_exhaust_to_terminal_state() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        server.set_policy(AcceptPolicy::Refuse("connection refused".to_string()));
        let t0 = Instant::now();

        supervisor.connect(t0);
        pump(&mut supervisor, &mut rx, t0);
        let mut now = t0;
        while let Some(at) = supervisor.reconnect_deadline() {
            now = at;
            supervisor.poll_reconnect(now);
            pump(&mut supervisor, &mut rx, now);
        }

        assert_eq!(now - t0, DELAY * 5);
        assert_eq!(server.open_count(), 6);
        assert_eq!(supervisor.state().attempt, 5);
        assert_eq!(supervisor.status(), ConnectionStatus::Closed);
        assert!(supervisor
            .state()
            .last_error
            .as_deref()
            .unwrap()
            .contains("after 5 reconnect attempts"));
        assert_eq!(supervisor.reconnect_deadline(), None);
    }

    #[test]
    fn test_connect_after_exhaustion_starts_fresh_cycle() {
        let policy = ReconnectPolicy {
            max_attempts: 1,
            delay: Duration::from_millis(10),
        };
        let (mut supervisor, mut rx, server) = setup(policy);
        server.set_policy(AcceptPolicy::Refuse("down".to_string()));
        let t0 = Instant::now();

        supervisor.connect(t0);
        pump(&mut supervisor, &mut rx, t0);
        supervisor.poll_reconnect(t0 + Duration::from_millis(10));
        pump(&mut supervisor, &mut rx, t0 + Duration::from_millis(10));
        assert_eq!(supervisor.reconnect_deadline(), None);

        server.set_policy(AcceptPolicy::Accept);
        supervisor.connect(t0 + Duration::from_millis(50));
        pump(&mut supervisor, &mut rx, t0 + Duration::from_millis(50));
        assert_eq!(supervisor.status(), ConnectionStatus::Open);
        assert!(supervisor.state().last_error.is_none());
    }

    #[test]
    fn test_zero_attempts_goes_terminal_immediately() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            delay: DELAY,
        };
        let (mut supervisor, mut rx, server) = setup(policy);
        server.set_policy(AcceptPolicy::Refuse("down".to_string()));
        let now = Instant::now();

        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);
        assert_eq!(supervisor.reconnect_deadline(), None);
        assert!(supervisor.state().last_error.is_some());
    }

    #[test]
    fn test_send_requires_open() {
        let (mut supervisor, _rx, server) = setup(ReconnectPolicy::default());

        let result = supervisor.send(&OutboundFrame::user("hello"));
        assert_eq!(result, Err(SyncError::NotConnected));
        assert!(supervisor.state().last_error.is_some());
        assert!(server.sent_frames().is_empty());
    }

    #[test]
    fn test_send_transmits_json() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);

        supervisor.send(&OutboundFrame::user("hello")).unwrap();
        assert_eq!(
            server.sent_frames(),
            vec![r#"{"type":"user","content":"hello"}"#.to_string()]
        );
    }

    #[test]
    fn test_disconnect_does_not_reconnect() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);

        supervisor.disconnect();
        assert!(supervisor.is_closing());
        // The client-side close report settles the channel without a reconnect.
        pump(&mut supervisor, &mut rx, now);

        assert!(!supervisor.is_closing());
        assert_eq!(supervisor.status(), ConnectionStatus::Closed);
        assert_eq!(supervisor.reconnect_deadline(), None);
        assert_eq!(supervisor.state().attempt, 0);
        assert_eq!(server.live_connections(), 0);
    }

    #[test]
    fn test_connect_waits_for_previous_close() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        server.set_close_deferred(true);
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);

        supervisor.disconnect();
        supervisor.connect(now);
        supervisor.connect(now);
        assert_eq!(supervisor.status(), ConnectionStatus::Connecting);
        assert_eq!(server.open_count(), 1);
        assert_eq!(server.live_connections(), 1);

        pump(&mut supervisor, &mut rx, now);
        assert_eq!(server.open_count(), 1);

        assert_eq!(server.finish_closing(), 1);
        pump(&mut supervisor, &mut rx, now);
        assert_eq!(server.open_count(), 2);
        assert_eq!(server.live_connections(), 1);
        assert_eq!(supervisor.status(), ConnectionStatus::Open);
        assert!(!supervisor.is_closing());
    }

    #[test]
    fn test_disconnect_cancels_deferred_connect() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        server.set_close_deferred(true);
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);

        supervisor.disconnect();
        supervisor.connect(now);
        supervisor.disconnect();
        assert_eq!(supervisor.status(), ConnectionStatus::Closed);

        server.finish_closing();
        pump(&mut supervisor, &mut rx, now);
        assert_eq!(server.open_count(), 1);
        assert_eq!(supervisor.status(), ConnectionStatus::Closed);
        assert_eq!(supervisor.reconnect_deadline(), None);
    }

    #[test]
    fn test_frames_from_closing_channel_ignored() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        server.set_close_deferred(true);
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);
        supervisor.disconnect();

        let late = ChannelEnvelope {
            channel: ChannelId(1),
            event: ChannelEvent::Frame("{\"type\":\"text\",\"content\":\"late\"}".to_string()),
        };
        assert_eq!(supervisor.handle_event(late, now), SupervisorOutput::None);
        assert!(supervisor.is_closing());
    }

    #[test]
    fn test_disconnect_cancels_pending_reconnect() {
        let (mut supervisor, mut rx, server) = setup(ReconnectPolicy::default());
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);
        server.close_active("drop");
        pump(&mut supervisor, &mut rx, now);
        assert!(supervisor.reconnect_deadline().is_some());

        supervisor.disconnect();
        assert_eq!(supervisor.reconnect_deadline(), None);
        supervisor.poll_reconnect(now + DELAY * 2);
        assert_eq!(server.open_count(), 1);
    }

    #[test]
    fn test_stale_channel_events_ignored() {
        let (mut supervisor, mut rx, _server) = setup(ReconnectPolicy::default());
        let now = Instant::now();
        supervisor.connect(now);
        pump(&mut supervisor, &mut rx, now);

        let stale = ChannelEnvelope {
            channel: ChannelId(99),
            event: ChannelEvent::Closed {
                code: None,
                reason: "old".to_string(),
            },
        };
        assert_eq!(supervisor.handle_event(stale, now), SupervisorOutput::None);
        assert_eq!(supervisor.status(), ConnectionStatus::Open);
    }

    #[test]
    fn test_invalid_address_feeds_reconnect_loop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (transport, _server) = LoopbackTransport::new_pair();
        let mut supervisor =
            ConnectionSupervisor::new("", ReconnectPolicy::default(), Arc::new(transport), tx);
        let now = Instant::now();

        supervisor.connect(now);
        assert_eq!(supervisor.status(), ConnectionStatus::Closed);
        assert_eq!(supervisor.state().attempt, 1);
        assert!(supervisor.state().last_error.is_some());
    }

    #[test]
    fn test_dispose_blocks_connect() {
        let (mut supervisor, _rx, server) = setup(ReconnectPolicy::default());
        supervisor.dispose();
        supervisor.connect(Instant::now());
        assert_eq!(server.open_count(), 0);
        assert!(supervisor.is_disposed());
    }
}
