// ── Core error types ──
//
// Everything the agent's tasks can fail with. Store failures are wrapped,
// HTTP failures keep the reqwest error so callers can inspect it.

use nodectl_store::StoreError;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Store ────────────────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    // ── Inbound messages ─────────────────────────────────────────────
    #[error("Malformed control message: {message}")]
    Decode { message: String },

    // ── Process supervisor ───────────────────────────────────────────
    #[error("Supervisor command for '{process}' failed: {message}")]
    Supervisor { process: String, message: String },

    // ── Outbound HTTP ────────────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Unusable response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}
