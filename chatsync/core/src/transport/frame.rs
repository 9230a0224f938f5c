//! Frame Protocol
//!
//! Wire format for chat frames: one JSON object per text frame.
//!
//! # Frame Format
//!
//! ```text
//! inbound  (server -> client): {"type": "stream", "content": "Hel", "id": "m1", "plugin": ..., "data": ...}
//! outbound (client -> server): {"type": "user", "content": "hi", ...caller fields}
//! ```
//!
//! Only JSON objects are structured frames. Anything else is a
//! [`FrameError::Malformed`] and is recovered by the caller as raw text; a
//! frame is never dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::TransportError;
use crate::messages::{AuxiliaryPayload, MessageRole};

/// Maximum outbound frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Inbound payload could not be read as a structured frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not JSON, or JSON that is not an object
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// A structured inbound frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InboundFrame {
    /// Sender-assigned id for correlating incremental updates
    pub id: Option<String>,
    /// Role resolved from the `type` tag
    pub role: MessageRole,
    /// Text content (empty when absent)
    pub content: String,
    /// `plugin`/`data` pass-through
    pub auxiliary: Option<AuxiliaryPayload>,
}

/// Parse an inbound text payload
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] when the payload is not a JSON object.
pub fn decode(raw: &str) -> Result<InboundFrame, FrameError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| FrameError::Malformed(e.to_string()))?;

    let Value::Object(mut fields) = value else {
        return Err(FrameError::Malformed("payload is not an object".to_string()));
    };

    let role = fields
        .get("type")
        .and_then(Value::as_str)
        .map(MessageRole::from_tag)
        .unwrap_or_default();

    Ok(InboundFrame {
        id: fields.remove("id").and_then(value_to_id),
        role,
        content: fields.remove("content").map(value_to_text).unwrap_or_default(),
        auxiliary: AuxiliaryPayload::from_parts(fields.remove("plugin"), fields.remove("data")),
    })
}

fn value_to_id(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A client-to-server frame
///
/// `type` and `content` are always present; any other caller-supplied fields
/// are carried through unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Role tag, `user` for submitted text
    #[serde(rename = "type")]
    pub kind: String,
    /// Text content
    pub content: String,
    /// Extra caller fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutboundFrame {
    /// A plain user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            kind: MessageRole::User.as_tag().to_string(),
            content: content.into(),
            extra: Map::new(),
        }
    }

    /// Add a pass-through field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Role used for the local echo of this frame
    #[must_use]
    pub fn role(&self) -> MessageRole {
        MessageRole::from_tag(&self.kind)
    }
}

/// Serialize an outbound frame
///
/// # Errors
///
/// Returns `TransportError::SendFailed` if serialization fails or the frame
/// exceeds [`MAX_FRAME_SIZE`].
pub fn encode(frame: &OutboundFrame) -> Result<String, TransportError> {
    let json = serde_json::to_string(frame).map_err(|e| TransportError::SendFailed(e.to_string()))?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(TransportError::SendFailed(format!(
            "Frame too large: {} bytes (max: {})",
            json.len(),
            MAX_FRAME_SIZE
        )));
    }

    Ok(json)
}
