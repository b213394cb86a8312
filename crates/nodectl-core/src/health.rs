// ── Health reporter ──
//
// Every interval: ask the supervisor about one process and push the
// verdict to the callback sink. Best effort; failures are logged only.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callback::CallbackClient;
use crate::error::CoreError;
use crate::supervisor::Supervisor;

/// `action` value of every health update.
pub const HEALTH_ACTION: &str = "callback-server";

/// Marker in pm2's status table, after whitespace is removed.
const STOPPED_MARKER: &str = "status│stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ProcessState {
    #[serde(rename = "started")]
    #[strum(serialize = "started")]
    Started,
    #[serde(rename = "stop")]
    #[strum(serialize = "stop")]
    Stopped,
}

/// Body POSTed to the callback sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub action: String,
    pub data: HealthData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthData {
    pub status: ProcessState,
    pub endpoint: String,
}

impl HealthStatus {
    pub fn new(status: ProcessState, endpoint: impl Into<String>) -> Self {
        Self {
            action: HEALTH_ACTION.to_owned(),
            data: HealthData {
                status,
                endpoint: endpoint.into(),
            },
        }
    }
}

/// `Stopped` only if the status text says so; anything else is `Started`.
pub fn classify(status_text: &str) -> ProcessState {
    let compact: String = status_text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains(STOPPED_MARKER) {
        ProcessState::Stopped
    } else {
        ProcessState::Started
    }
}

/// Periodic producer of [`HealthStatus`] updates.
pub struct HealthReporter {
    supervisor: Arc<dyn Supervisor>,
    callback: Option<CallbackClient>,
    process: String,
    endpoint: String,
    interval: Duration,
}

impl HealthReporter {
    /// Without a `callback` client the reporter still checks and logs, but
    /// has nowhere to deliver.
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        callback: Option<CallbackClient>,
        process: String,
        endpoint: String,
        interval: Duration,
    ) -> Self {
        Self {
            supervisor,
            callback,
            process,
            endpoint,
            interval,
        }
    }

    /// Query the supervisor and build the update.
    ///
    /// A failed status query is logged and classified from empty text.
    pub async fn check(&self) -> HealthStatus {
        let text = match self.supervisor.status(&self.process).await {
            Ok(text) => text,
            Err(e) => {
                warn!(process = %self.process, error = %e, "status query failed");
                String::new()
            }
        };
        HealthStatus::new(classify(&text), self.endpoint.clone())
    }

    /// Run one cycle: check, then deliver.
    pub async fn report(&self) -> Result<HealthStatus, CoreError> {
        let status = self.check().await;
        match &self.callback {
            Some(callback) => callback.post(&status).await?,
            None => debug!(status = %status.data.status, "no callback sink configured"),
        }
        Ok(status)
    }

    /// Report every interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // consume the immediate first tick
        info!(
            process = %self.process,
            every = ?self.interval,
            callback = self.callback.as_ref().map(|c| c.url().as_str()),
            "health reporter started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.report().await {
                        warn!(process = %self.process, error = %e, "health callback dropped");
                    }
                }
            }
        }
        debug!("health reporter stopped");
    }
}
