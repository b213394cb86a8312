use thiserror::Error;

use crate::config::Topology;

/// Top-level error type for the `nodectl-store` crate.
///
/// The facade is a pass-through: store failures are surfaced verbatim,
/// never retried. `nodectl-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    // ── Construction ────────────────────────────────────────────────
    /// The endpoint configuration does not describe a usable topology.
    #[error("Invalid store configuration: {message}")]
    Configuration { message: String },

    /// The connectivity check failed under the fail-fast policy.
    #[error("Cannot reach {topology} store: {source}")]
    Connection {
        topology: Topology,
        #[source]
        source: redis::RedisError,
    },

    // ── Operations ──────────────────────────────────────────────────
    /// Error returned by the Redis client (network, protocol, or server reply).
    #[error("Store operation failed: {0}")]
    Operation(#[from] redis::RedisError),

    /// Error raised by a non-Redis backend (e.g. the in-memory store).
    #[error("Store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    /// Returns `true` if the backing store could not be reached at all.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Operation(e) => e.is_io_error() || e.is_connection_refusal() || e.is_timeout(),
            _ => false,
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
