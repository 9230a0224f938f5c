//! Endpoint Resolution
//!
//! Derives the channel address from environment context. The engine itself
//! only ever sees the resolved string.

use serde::{Deserialize, Serialize};

/// Host used by development builds
pub const DEVELOPMENT_HOST: &str = "localhost:8000";

/// Path of the chat socket on the server
pub const CHAT_PATH: &str = "/ws/chat";

/// Inputs to address resolution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointContext {
    /// Use `wss` instead of `ws`
    pub secure: bool,
    /// Host (and optional port) the client is served from
    pub host: String,
    /// Explicit address or path
    pub override_url: Option<String>,
    /// Development build
    pub development: bool,
}

impl Default for EndpointContext {
    fn default() -> Self {
        Self {
            secure: false,
            host: DEVELOPMENT_HOST.to_string(),
            override_url: None,
            development: false,
        }
    }
}

impl EndpointContext {
    fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }
}

/// Resolve the channel address
///
/// A full `ws://`/`wss://` override wins outright. Any other override is a
/// path on the current host. Without an override, development targets
/// [`DEVELOPMENT_HOST`] and production targets the current host.
#[must_use]
pub fn resolve_endpoint(ctx: &EndpointContext) -> String {
    let scheme = ctx.scheme();

    if let Some(url) = ctx.override_url.as_deref().filter(|u| !u.is_empty()) {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            return url.to_string();
        }
        let sep = if url.starts_with('/') { "" } else { "/" };
        return format!("{scheme}://{}{sep}{url}", ctx.host);
    }

    let host = if ctx.development {
        DEVELOPMENT_HOST
    } else {
        ctx.host.as_str()
    };
    format!("{scheme}://{host}{CHAT_PATH}")
}
