//! Message Records
//!
//! The records stored in the ledger and the display records handed to the
//! rendering layer.
//!
//! # Design Philosophy
//!
//! A [`MessageRecord`] is the source of truth for "what happened". A
//! [`DisplayRecord`] is a derived, render-ready view of one record: for
//! animated roles its content is the revealed prefix, for everything else it is
//! the record's content verbatim. Renderers only ever see display records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who a message belongs to
///
/// A closed tag set. `Stream` and `Assistant` are revealed progressively,
/// `User` and `Text` are displayed immediately and in full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Sent by the local user
    User,
    /// Complete or growing assistant reply
    Assistant,
    /// Incremental assistant output
    Stream,
    /// System notices, widgets and anything untagged
    #[default]
    #[serde(alias = "system")]
    Text,
}

impl MessageRole {
    /// Map a wire tag to a role
    ///
    /// `system` is an alias of `text`; unknown tags fall back to `text`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "stream" => Self::Stream,
            _ => Self::Text,
        }
    }

    /// The wire tag for this role
    #[must_use]
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Stream => "stream",
            Self::Text => "text",
        }
    }

    /// Whether records with this role are revealed progressively
    #[must_use]
    pub fn is_revealed(self) -> bool {
        matches!(self, Self::Assistant | Self::Stream)
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Message identifier
///
/// Either assigned by the remote sender or synthesized from the arrival
/// position in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Positional id for a record that arrived without one
    ///
    /// Only stable within one ledger's append order.
    #[must_use]
    pub fn sequential(position: usize) -> Self {
        Self(format!("seq-{position}"))
    }

    /// Id for a raw payload that could not be parsed
    #[must_use]
    pub fn raw(arrived_at: DateTime<Utc>, position: usize) -> Self {
        Self(format!("raw-{}-{position}", arrived_at.timestamp_millis()))
    }

    /// Borrow the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque structured data attached to a widget message
///
/// Never interpreted by the engine; passed through to renderers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryPayload {
    /// Widget name, e.g. `account_balance`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<Value>,
    /// Widget data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AuxiliaryPayload {
    /// Build a payload only when at least one field is present
    #[must_use]
    pub fn from_parts(plugin: Option<Value>, data: Option<Value>) -> Option<Self> {
        if plugin.is_none() && data.is_none() {
            None
        } else {
            Some(Self { plugin, data })
        }
    }
}

/// A message in the ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Stable identifier, unique within the session
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Full text known so far
    pub content: String,
    /// Widget payload, if any
    pub auxiliary: Option<AuxiliaryPayload>,
    /// Arrival (or submission) time
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    /// Create a plain record stamped with the given time
    pub fn new(
        id: MessageId,
        role: MessageRole,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            auxiliary: None,
            timestamp,
        }
    }

    /// Attach an auxiliary payload
    #[must_use]
    pub fn with_auxiliary(mut self, auxiliary: Option<AuxiliaryPayload>) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    /// Content length in characters
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// A render-ready view of one ledger record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayRecord {
    /// Ledger id
    pub id: MessageId,
    /// Role of the underlying record
    pub role: MessageRole,
    /// Text to display (revealed prefix for animated roles)
    pub content: String,
    /// Whether more text is still being revealed
    pub revealing: bool,
    /// Widget payload, if any
    pub auxiliary: Option<AuxiliaryPayload>,
    /// Arrival time of the underlying record
    pub timestamp: DateTime<Utc>,
}

/// Prefix of `text` holding at most `chars` characters
///
/// Always cuts on a char boundary.
#[must_use]
pub fn char_prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
