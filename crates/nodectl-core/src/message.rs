// ── Control messages ──
//
// Inbound commands on the shared channel: `{"action": "...", "server": "host:port"}`.
// Unknown fields are ignored; a missing `server` decodes as empty.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Shared pub/sub channel carrying control messages.
pub const CONTROL_CHANNEL: &str = "redis_pub_sub_server_resource";

/// A start/stop request addressed to one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub server: String,
}

/// What a control message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    /// `"active"`: start the bound process.
    Active,
    /// `"inactive"`: stop the bound process.
    Inactive,
    /// Any other value. Accepted and ignored.
    Other,
}

impl ControlMessage {
    pub fn new(action: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            server: server.into(),
        }
    }

    /// Parse a UTF-8 JSON payload.
    pub fn decode(payload: &str) -> Result<Self, CoreError> {
        serde_json::from_str(payload).map_err(|e| CoreError::Decode {
            message: e.to_string(),
        })
    }

    pub fn action(&self) -> Action {
        match self.action.as_str() {
            "active" => Action::Active,
            "inactive" => Action::Inactive,
            _ => Action::Other,
        }
    }

    /// Host and port named by `server`, or `None` when it is blank.
    pub fn target(&self) -> Option<ServerAddr> {
        let server = self.server.trim();
        if server.is_empty() {
            None
        } else {
            Some(ServerAddr::parse(server))
        }
    }
}

/// A `host[:port]` identity as carried in `server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    /// Port text, present only when the part after the last colon is all
    /// digits.
    pub port: Option<String>,
}

impl ServerAddr {
    /// Split on the last colon. Brackets around an IPv6 host are removed.
    pub fn parse(server: &str) -> Self {
        let (host, port) = match server.rsplit_once(':') {
            Some((host, port))
                if !port.is_empty()
                    && port.bytes().all(|b| b.is_ascii_digit())
                    && (!host.contains(':') || host.ends_with(']')) =>
            {
                (host, Some(port.to_owned()))
            }
            Some((host, "")) if !host.contains(':') || host.ends_with(']') => (host, None),
            _ => (server, None),
        };
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        Self {
            host: host.to_owned(),
            port,
        }
    }

    /// Numeric port, if present and in range.
    pub fn port_number(&self) -> Option<u16> {
        self.port.as_deref().and_then(|p| p.parse().ok())
    }
}
