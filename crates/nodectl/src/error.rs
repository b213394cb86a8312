//! CLI error types with miette diagnostics.
//!
//! Maps config, store, and core errors onto exit codes with help text.

use miette::Diagnostic;
use thiserror::Error;

use nodectl_config::ConfigError;
use nodectl_core::CoreError;
use nodectl_store::StoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration")]
    #[diagnostic(
        code(nodectl::config),
        help(
            "Check the file passed with --config and the REDIS_*, SERVER_*, CMS_ENDPOINT\n\
             and NODECTL_* environment variables. Print the effective settings with:\n\
             nodectl config"
        )
    )]
    Config(#[source] ConfigError),

    #[error("Store is not configured correctly")]
    #[diagnostic(
        code(nodectl::store_config),
        help("Set REDIS_SERVER to one endpoint (standalone) or several (cluster).")
    )]
    StoreConfig(#[source] StoreError),

    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the store")]
    #[diagnostic(
        code(nodectl::connection_failed),
        help(
            "Check that the store is running and reachable from this node,\n\
             or set store.probe_policy = \"degraded\" to start anyway."
        )
    )]
    Connection(#[source] StoreError),

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Store operation failed")]
    #[diagnostic(code(nodectl::store))]
    Store(#[source] StoreError),

    #[error("Agent failed to start")]
    #[diagnostic(code(nodectl::agent))]
    Agent(#[source] CoreError),

    #[error("Could not install signal handler")]
    #[diagnostic(code(nodectl::signal))]
    Signal(#[source] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::StoreConfig(_) | Self::Agent(CoreError::Config { .. }) => {
                exit_code::USAGE
            }
            Self::Connection(_) => exit_code::CONNECTION,
            Self::Store(e) if e.is_connection() => exit_code::CONNECTION,
            Self::Store(_) | Self::Agent(_) | Self::Signal(_) => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Configuration { .. } => Self::StoreConfig(err),
            StoreError::Connection { .. } => Self::Connection(err),
            other => Self::Store(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Store(e) => e.into(),
            other => Self::Agent(other),
        }
    }
}
