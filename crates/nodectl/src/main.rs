mod cli;
mod error;

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nodectl_config::Settings;
use nodectl_core::{Agent, Pm2Supervisor, Supervisor};
use nodectl_store::{ProbePolicy, Store};

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = nodectl_config::load(cli.global.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Config => {
            print!("{}", nodectl_config::render(&settings)?);
            Ok(())
        }
        Command::Check => check(&settings).await,
        Command::Run => run_agent(&settings).await,
    }
}

/// Connect with a fail-fast ping regardless of the configured policy.
async fn check(settings: &Settings) -> Result<(), CliError> {
    let mut config = settings.store_config()?;
    config.probe_policy = ProbePolicy::FailFast;

    let store = Store::connect(&config).await?;
    println!("store reachable ({} topology)", store.topology());
    store.close().await;
    Ok(())
}

async fn run_agent(settings: &Settings) -> Result<(), CliError> {
    let store_config = settings.store_config()?;
    let agent_config = settings.agent_config()?;

    let store = Arc::new(Store::connect(&store_config).await?);
    let pm2 = Pm2Supervisor::new(settings.control.supervisor_program.clone())
        .with_timeout(settings.supervisor_timeout()?);
    info!(program = pm2.program(), "process supervisor configured");
    let supervisor: Arc<dyn Supervisor> = Arc::new(pm2);

    let handle = Agent::start(Arc::clone(&store), supervisor, agent_config).await?;

    let signal = shutdown_signal().await;
    info!("shutting down");
    handle.shutdown().await;
    store.close().await;
    signal
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() -> Result<(), CliError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).map_err(CliError::Signal)?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map_err(CliError::Signal),
            _ = term.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(CliError::Signal)
    }
}
