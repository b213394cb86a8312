// ── Node identity & process bindings ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prefix of the per-node usage key.
pub const USAGE_KEY_PREFIX: &str = "ovp_nodejs:Server:resource:";

/// Process started when a control message names an unbound port.
pub const DEFAULT_PROCESS: &str = "pegatv-transcode-dev-live-1";

/// Static port → supervised-process table. Loaded once, read-only after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBinding {
    ports: BTreeMap<u16, String>,
    fallback: String,
}

impl Default for ProcessBinding {
    fn default() -> Self {
        Self::new(
            [(1935, "live-srs"), (1954, "cdn-main"), (2443, "live-cdn")]
                .into_iter()
                .map(|(port, name)| (port, name.to_owned())),
            DEFAULT_PROCESS,
        )
    }
}

impl ProcessBinding {
    pub fn new(ports: impl IntoIterator<Item = (u16, String)>, fallback: impl Into<String>) -> Self {
        Self {
            ports: ports.into_iter().collect(),
            fallback: fallback.into(),
        }
    }

    /// Process bound to `port`, or the fallback when the port is missing or
    /// unrecognised.
    pub fn resolve(&self, port: Option<u16>) -> &str {
        port.and_then(|p| self.ports.get(&p))
            .map_or(self.fallback.as_str(), String::as_str)
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// How this node is addressed by publishers and named in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Externally reachable host, compared against `server` hosts.
    pub host: String,
    /// Port suffix of the usage key. Kept as text; may be empty.
    pub port: String,
}

impl NodeIdentity {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// `true` if `host` names this node.
    pub fn matches(&self, host: &str) -> bool {
        host == self.host
    }

    /// Store key holding this node's latest resource snapshot.
    pub fn usage_key(&self) -> String {
        format!("{USAGE_KEY_PREFIX}{}:{}", self.host, self.port)
    }

    /// Endpoint reported in health callbacks.
    pub fn health_endpoint(&self, port: u16) -> String {
        format!("https://{}:{port}/", self.host)
    }
}
