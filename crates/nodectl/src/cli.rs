//! Clap derive structures for the `nodectl` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// nodectl -- node-local control agent
#[derive(Debug, Parser)]
#[command(
    name = "nodectl",
    version,
    about = "Node-local control agent for pm2-supervised services",
    long_about = "Node-local control agent for pm2-supervised services.\n\n\
        Listens for start/stop commands on a shared Redis channel, drives pm2\n\
        accordingly, and reports resource usage and service health.\n\n\
        Runs the agent when no subcommand is given.",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// TOML configuration file (optional; environment still applies)
    #[arg(long, short = 'c', env = "NODECTL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, env = "NODECTL_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum Command {
    /// Run the agent until interrupted (default)
    Run,
    /// Connect to the store, ping it, and exit
    Check,
    /// Print the effective configuration as TOML
    Config,
}
