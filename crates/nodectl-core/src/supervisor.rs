// ── Process supervisor client ──
//
// Narrow start/stop/status capability over an external process manager.
// The default implementation shells out to pm2; tests substitute a mock.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::CoreError;

/// Program invoked by [`Pm2Supervisor`] unless configured otherwise.
pub const DEFAULT_PROGRAM: &str = "pm2";

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Start, stop and query named long-lived processes.
///
/// Implementations are expected to be idempotent: starting a running
/// process or stopping a stopped one succeeds.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn start(&self, name: &str) -> Result<(), CoreError>;

    async fn stop(&self, name: &str) -> Result<(), CoreError>;

    /// Free-form status report for `name`.
    async fn status(&self, name: &str) -> Result<String, CoreError>;
}

/// [`Supervisor`] driving the pm2 command line.
///
/// Runs `<program> start|stop|show <name>` directly, without a shell.
#[derive(Debug, Clone)]
pub struct Pm2Supervisor {
    program: String,
    timeout: Duration,
}

impl Default for Pm2Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl Pm2Supervisor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: COMMAND_TIMEOUT,
        }
    }

    /// Bound on how long one supervisor command may run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, verb: &str, name: &str) -> Result<String, CoreError> {
        let failed = |message: String| CoreError::Supervisor {
            process: name.to_owned(),
            message,
        };

        let mut cmd = Command::new(&self.program);
        cmd.arg(verb)
            .arg(name)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(program = %self.program, verb, process = name, "running supervisor command");
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| failed(format!("{verb} timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| failed(format!("cannot run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("{verb} exited with {}: {}", output.status, stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Supervisor for Pm2Supervisor {
    async fn start(&self, name: &str) -> Result<(), CoreError> {
        self.run("start", name).await.map(drop)
    }

    async fn stop(&self, name: &str) -> Result<(), CoreError> {
        self.run("stop", name).await.map(drop)
    }

    async fn status(&self, name: &str) -> Result<String, CoreError> {
        self.run("show", name).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_returns_stdout() {
        // `echo show <name>` stands in for pm2.
        let supervisor = Pm2Supervisor::new("echo");
        let out = supervisor.status("live-cdn").await.unwrap();
        assert_eq!(out.trim(), "show live-cdn");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_supervisor_error() {
        let supervisor = Pm2Supervisor::new("false");
        let err = supervisor.start("cdn-main").await.unwrap_err();
        assert!(matches!(err, CoreError::Supervisor { ref process, .. } if process == "cdn-main"));
    }

    #[tokio::test]
    async fn missing_program_is_a_supervisor_error() {
        let supervisor = Pm2Supervisor::new("/nonexistent/pm2");
        assert!(supervisor.stop("live-srs").await.is_err());
    }
}
