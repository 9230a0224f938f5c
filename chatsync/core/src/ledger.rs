//! Message Ledger
//!
//! The ordered store of every message record in the session.
//!
//! Records are kept in insertion order and never removed or reordered. An id
//! maps to a fixed position the moment it is first seen, so a later frame with
//! the same id updates that position in place instead of appending a
//! duplicate. This is how a streamed reply growing under one id is
//! represented.
//!
//! Ids the engine makes up for frames that carry none are claimed so they
//! can never collide with a server id, in either arrival order.

use std::collections::{HashMap, HashSet};

use crate::messages::{MessageId, MessageRecord};

/// What [`MessageLedger::append`] did with a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The id was new; the record was added at `position`
    Inserted {
        /// Ledger position of the new record
        position: usize,
    },
    /// The id already existed at `position`
    Updated {
        /// Ledger position of the existing record
        position: usize,
        /// Whether the content was replaced (false when the update was shorter)
        replaced: bool,
    },
}

impl AppendOutcome {
    /// Ledger position touched by the append
    #[must_use]
    pub fn position(self) -> usize {
        match self {
            Self::Inserted { position } | Self::Updated { position, .. } => position,
        }
    }
}

/// Append/update store keyed by message id
#[derive(Debug, Default)]
pub struct MessageLedger {
    records: Vec<MessageRecord>,
    positions: HashMap<MessageId, usize>,
    claimed: HashSet<MessageId>,
    aliases: HashMap<MessageId, MessageId>,
}

impl MessageLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record or update the existing one with the same id
    ///
    /// Content is last-write-wins keyed by length: an update replaces content
    /// only when it is at least as long as what is stored. Role and auxiliary
    /// payload follow the latest frame; the first-arrival timestamp is kept.
    ///
    /// A role change on update can restart reveal: a record first stored as
    /// `text` and later updated as `assistant` is revealed again from zero.
    pub fn append(&mut self, record: MessageRecord) -> AppendOutcome {
        if let Some(&position) = self.positions.get(&record.id) {
            let existing = &mut self.records[position];
            let replaced = record.char_len() >= existing.char_len();

            if replaced {
                existing.content = record.content;
            } else {
                tracing::debug!(
                    id = %existing.id,
                    stored = existing.char_len(),
                    incoming = record.char_len(),
                    "Ignoring shorter content for existing message"
                );
            }
            existing.role = record.role;
            if record.auxiliary.is_some() {
                existing.auxiliary = record.auxiliary;
            }

            return AppendOutcome::Updated { position, replaced };
        }

        let position = self.records.len();
        self.positions.insert(record.id.clone(), position);
        self.records.push(record);
        AppendOutcome::Inserted { position }
    }

    /// Point-in-time copy of all records in order
    #[must_use]
    pub fn snapshot(&self) -> Vec<MessageRecord> {
        self.records.clone()
    }

    /// Borrow the records in order
    #[must_use]
    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    /// Look up a record by id
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&MessageRecord> {
        self.positions.get(id).map(|&position| &self.records[position])
    }

    /// Ledger position of an id
    #[must_use]
    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Id the next record without one would get, without claiming it
    ///
    /// `seq-<len>`, or the first free `seq-<len>-<n>` when that id is taken.
    /// See [`MessageLedger::claim_sequential_id`].
    #[must_use]
    pub fn next_sequential_id(&self) -> MessageId {
        self.unused_id(MessageId::sequential(self.records.len()))
    }

    /// `base` if no record holds it, otherwise the first free `<base>-<n>`
    #[must_use]
    pub fn unused_id(&self, base: MessageId) -> MessageId {
        if !self.is_taken(&base) {
            return base;
        }
        let mut n = 1usize;
        loop {
            let candidate = MessageId(format!("{base}-{n}"));
            if !self.is_taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn is_taken(&self, id: &MessageId) -> bool {
        self.positions.contains_key(id) || self.claimed.contains(id)
    }

    /// Reserve an engine-made id derived from `base`
    ///
    /// The returned id never takes the update path of
    /// [`MessageLedger::append`] for an earlier record, and a server frame
    /// reusing it later is kept apart by [`MessageLedger::resolve_server_id`].
    pub fn claim_id(&mut self, base: MessageId) -> MessageId {
        let id = self.unused_id(base);
        self.claimed.insert(id.clone());
        id
    }

    /// Reserve the next sequential id
    pub fn claim_sequential_id(&mut self) -> MessageId {
        self.claim_id(MessageId::sequential(self.records.len()))
    }

    /// Ledger id for an id supplied by the server
    ///
    /// Usually the id itself. A server id that matches an engine-made id is
    /// mapped, for the rest of the session, to a fresh id of its own.
    pub fn resolve_server_id(&mut self, id: MessageId) -> MessageId {
        if let Some(alias) = self.aliases.get(&id) {
            return alias.clone();
        }
        if !self.claimed.contains(&id) {
            return id;
        }
        let alias = self.claim_id(id.clone());
        tracing::debug!(server_id = %id, ledger_id = %alias, "Server id collides with a local id");
        self.aliases.insert(id, alias.clone());
        alias
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
