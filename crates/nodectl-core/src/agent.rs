// ── Agent lifecycle ──
//
// Wires the dispatcher and both reporters onto one shared store and
// supervisor, each under a child cancellation token.

use std::sync::Arc;
use std::time::Duration;

use nodectl_store::Store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::binding::{NodeIdentity, ProcessBinding};
use crate::callback::CallbackClient;
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::feed::{ControlFeed, ResubscribeConfig};
use crate::health::HealthReporter;
use crate::message::CONTROL_CHANNEL;
use crate::metrics::{DEFAULT_METRICS_ENDPOINT, MetricsClient};
use crate::supervisor::Supervisor;
use crate::transport::{TlsMode, TransportConfig};
use crate::usage::UsageReporter;

/// Everything the agent's tasks need besides the store and supervisor.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub identity: NodeIdentity,
    pub bindings: ProcessBinding,
    /// Control channel to subscribe to.
    pub channel: String,
    /// Backoff between control-channel resubscriptions.
    pub resubscribe: ResubscribeConfig,
    pub usage_interval: Duration,
    pub health_interval: Duration,
    pub metrics_endpoint: String,
    pub metrics_timeout: Duration,
    /// Management service root. `None` disables health delivery.
    pub callback_base: Option<Url>,
    pub callback_timeout: Duration,
    pub tls: TlsMode,
    /// Process whose status the health reporter watches.
    pub health_process: String,
    /// Port of the endpoint named in health updates.
    pub health_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            identity: NodeIdentity::default(),
            bindings: ProcessBinding::default(),
            channel: CONTROL_CHANNEL.to_owned(),
            resubscribe: ResubscribeConfig::default(),
            usage_interval: Duration::from_secs(1),
            health_interval: Duration::from_secs(30),
            metrics_endpoint: DEFAULT_METRICS_ENDPOINT.to_owned(),
            metrics_timeout: Duration::from_secs(3),
            callback_base: None,
            callback_timeout: Duration::from_secs(5),
            tls: TlsMode::default(),
            health_process: "live-cdn".to_owned(),
            health_port: 2443,
        }
    }
}

/// Running agent.
pub struct Agent;

impl Agent {
    /// Subscribe to the control channel and spawn the three tasks.
    ///
    /// Fails only if an endpoint URL is invalid or the HTTP clients cannot
    /// be built. If the control channel cannot be subscribed yet, the
    /// dispatcher keeps retrying in the background.
    pub async fn start(
        store: Arc<Store>,
        supervisor: Arc<dyn Supervisor>,
        config: AgentConfig,
    ) -> Result<AgentHandle, CoreError> {
        let metrics_endpoint =
            Url::parse(&config.metrics_endpoint).map_err(|e| CoreError::Config {
                message: format!("invalid metrics endpoint '{}': {e}", config.metrics_endpoint),
            })?;
        let metrics = MetricsClient::new(
            metrics_endpoint,
            &TransportConfig {
                tls: config.tls,
                timeout: config.metrics_timeout,
            },
        )?;
        let callback = config
            .callback_base
            .as_ref()
            .map(|base| {
                CallbackClient::new(
                    base,
                    &TransportConfig {
                        tls: config.tls,
                        timeout: config.callback_timeout,
                    },
                )
            })
            .transpose()?;
        if callback.is_none() {
            warn!("no callback endpoint configured, health updates will not be delivered");
        }

        let mut feed = ControlFeed::new(Arc::clone(&store), config.channel.clone(), config.resubscribe);
        if let Err(e) = feed.open().await {
            warn!(channel = %config.channel, error = %e, "control subscription failed, retrying in background");
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(3);

        let dispatcher = Dispatcher::new(
            config.identity.clone(),
            config.bindings.clone(),
            Arc::clone(&supervisor),
        );
        let token = cancel.child_token();
        tasks.push(tokio::spawn(async move { dispatcher.run(feed, token).await }));

        let usage = UsageReporter::new(
            Arc::clone(&store),
            metrics,
            config.identity.usage_key(),
            config.usage_interval,
        );
        let token = cancel.child_token();
        tasks.push(tokio::spawn(async move { usage.run(token).await }));

        let health = HealthReporter::new(
            supervisor,
            callback,
            config.health_process.clone(),
            config.identity.health_endpoint(config.health_port),
            config.health_interval,
        );
        let token = cancel.child_token();
        tasks.push(tokio::spawn(async move { health.run(token).await }));

        info!(host = %config.identity.host, port = %config.identity.port, "agent started");
        Ok(AgentHandle { cancel, tasks })
    }
}

/// Owner of the agent's background tasks.
pub struct AgentHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "agent task ended abnormally");
            }
        }
        debug!("agent stopped");
    }
}
