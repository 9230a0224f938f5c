//! Reveal Scheduler
//!
//! Progressive, fixed-cadence disclosure of assistant text, decoupled from
//! network delivery timing.
//!
//! # State Machine
//!
//! ```text
//!              first non-empty content
//!   absent ──────────────────────────────▶ revealing ◀──┐
//!                                            │   │       │ tick: revealed += step
//!                                            │   └───────┘ (clamped to content)
//!                     revealed == content    │
//!                     at a tick boundary     ▼
//!                                         settled
//!                                            │
//!                      content grows         │
//!                      (resume, never 0)     └──────────▶ revealing
//! ```
//!
//! Every message in `revealing` owns exactly one pending timer (its next due
//! instant). Content is read fresh from the ledger at every tick, so updates
//! that land between ticks are never revealed stale or truncated.
//! `revealed` is monotonically non-decreasing for an id.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::ledger::MessageLedger;
use crate::messages::{char_prefix, MessageId, MessageRole};

/// Default time between reveal ticks
pub const DEFAULT_REVEAL_INTERVAL: Duration = Duration::from_millis(30);

/// Default characters revealed per tick
pub const DEFAULT_REVEAL_STEP: usize = 2;

/// Reveal cadence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevealConfig {
    /// Time between ticks (must be positive)
    pub interval: Duration,
    /// Characters revealed per tick (must be positive)
    pub step: usize,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REVEAL_INTERVAL,
            step: DEFAULT_REVEAL_STEP,
        }
    }
}

/// Phase of one message's reveal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealPhase {
    /// Ticking towards the current content length
    Revealing,
    /// Caught up with the content; no timer pending
    Settled,
}

/// Reveal progress for one message id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevealState {
    /// Characters disclosed so far
    pub revealed: usize,
    /// Current phase
    pub phase: RevealPhase,
    /// Next tick, present only while revealing
    due: Option<Instant>,
}

impl RevealState {
    /// Whether the reveal has caught up and stopped ticking
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == RevealPhase::Settled
    }
}

/// Displayable slice of a revealed message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevealView<'a> {
    /// Revealed prefix of the content
    pub text: &'a str,
    /// Whether more text is still to come
    pub revealing: bool,
}

/// Per-message reveal state plus its timers
#[derive(Debug)]
pub struct RevealScheduler {
    config: RevealConfig,
    states: HashMap<MessageId, RevealState>,
}

impl RevealScheduler {
    /// Create a scheduler; a zero interval or step is raised to the minimum
    #[must_use]
    pub fn new(config: RevealConfig) -> Self {
        let config = RevealConfig {
            interval: config.interval.max(Duration::from_millis(1)),
            step: config.step.max(1),
        };
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Effective cadence
    #[must_use]
    pub fn config(&self) -> RevealConfig {
        self.config
    }

    /// React to a ledger insert or update touching `id`
    ///
    /// Starts a reveal for a new qualifying id, and reopens a settled one whose
    /// content grew past what was revealed. An id that is already revealing
    /// keeps its timer; the next tick reads the new content.
    pub fn observe(&mut self, id: &MessageId, role: MessageRole, content_len: usize, now: Instant) {
        let interval = self.config.interval;

        match self.states.get_mut(id) {
            None => {
                if !role.is_revealed() || content_len == 0 {
                    return;
                }
                tracing::trace!(id = %id, "Reveal started");
                self.states.insert(
                    id.clone(),
                    RevealState {
                        revealed: 0,
                        phase: RevealPhase::Revealing,
                        due: Some(now + interval),
                    },
                );
            }
            Some(state) => {
                if state.phase == RevealPhase::Settled && content_len > state.revealed {
                    tracing::trace!(id = %id, from = state.revealed, "Reveal resumed");
                    state.phase = RevealPhase::Revealing;
                    state.due = Some(now + interval);
                }
            }
        }
    }

    /// Fire every tick due at or before `now`
    ///
    /// Ticks missed by a late caller are replayed one cadence step at a time.
    /// Returns true if any revealed length changed.
    pub fn tick(&mut self, now: Instant, ledger: &MessageLedger) -> bool {
        let RevealConfig { interval, step } = self.config;
        let mut changed = false;

        for (id, state) in &mut self.states {
            while let Some(due) = state.due {
                if due > now {
                    break;
                }

                let target = ledger.get(id).map_or(0, |record| record.char_len());
                let next = state.revealed.saturating_add(step).min(target);
                if next > state.revealed {
                    state.revealed = next;
                    changed = true;
                }

                if state.revealed >= target {
                    tracing::debug!(id = %id, revealed = state.revealed, "Reveal settled");
                    state.phase = RevealPhase::Settled;
                    state.due = None;
                    changed = true;
                } else {
                    state.due = Some(due + interval);
                }
            }
        }

        changed
    }

    /// Earliest pending tick
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.states.values().filter_map(|s| s.due).min()
    }

    /// Number of pending tick timers (one per revealing id)
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.states.values().filter(|s| s.due.is_some()).count()
    }

    /// Reveal state for an id
    #[must_use]
    pub fn state(&self, id: &MessageId) -> Option<&RevealState> {
        self.states.get(id)
    }

    /// Revealed slice of `content` for an id with reveal state
    ///
    /// The prefix is clamped to the content, so a shorter content never
    /// panics and never lowers the stored revealed length.
    #[must_use]
    pub fn view<'a>(&self, id: &MessageId, content: &'a str) -> Option<RevealView<'a>> {
        let state = self.states.get(id)?;
        let text = char_prefix(content, state.revealed);
        Some(RevealView {
            text,
            revealing: state.phase == RevealPhase::Revealing,
        })
    }

    /// Cancel every pending timer
    ///
    /// Reveal progress is kept; revealing ids become settled where they stand.
    pub fn cancel_all(&mut self) {
        for state in self.states.values_mut() {
            state.due = None;
            state.phase = RevealPhase::Settled;
        }
    }
}
