// ── Command dispatcher ──
//
// Sole consumer of the control channel. Each payload walks
// Received → Decoded → Matched | Ignored → Applied | Failed; nothing that
// happens to one message stops the loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binding::{NodeIdentity, ProcessBinding};
use crate::feed::ControlFeed;
use crate::message::{Action, ControlMessage};
use crate::supervisor::Supervisor;

/// Terminal state of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Payload did not decode as a control message.
    Malformed { reason: String },
    /// Blank `server` or addressed to another host.
    Ignored,
    /// Supervisor command issued and accepted. Unknown actions land here
    /// without touching the supervisor.
    Applied { action: Action, process: String },
    /// Supervisor command issued and failed. Logged, never retried.
    Failed {
        action: Action,
        process: String,
        reason: String,
    },
}

/// Routes control messages addressed to this node to the supervisor.
pub struct Dispatcher {
    identity: NodeIdentity,
    bindings: ProcessBinding,
    supervisor: Arc<dyn Supervisor>,
}

impl Dispatcher {
    pub fn new(
        identity: NodeIdentity,
        bindings: ProcessBinding,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        Self {
            identity,
            bindings,
            supervisor,
        }
    }

    /// Handle one raw payload.
    ///
    /// The supervisor is invoked unconditionally for every matched
    /// `active`/`inactive`; repeated deliveries rely on its idempotence.
    pub async fn dispatch(&self, payload: &str) -> DispatchOutcome {
        let msg = match ControlMessage::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, payload, "dropping malformed control message");
                return DispatchOutcome::Malformed {
                    reason: e.to_string(),
                };
            }
        };

        let Some(target) = msg.target() else {
            debug!(action = %msg.action, "control message without server, ignored");
            return DispatchOutcome::Ignored;
        };
        if !self.identity.matches(&target.host) {
            debug!(server = %msg.server, "control message for another node, ignored");
            return DispatchOutcome::Ignored;
        }

        let process = self.bindings.resolve(target.port_number()).to_owned();
        let action = msg.action();
        let result = match action {
            Action::Active => self.supervisor.start(&process).await,
            Action::Inactive => self.supervisor.stop(&process).await,
            Action::Other => {
                debug!(action = %msg.action, process = %process, "unknown action, nothing to do");
                return DispatchOutcome::Applied { action, process };
            }
        };

        match result {
            Ok(()) => {
                info!(%action, process = %process, "supervisor command applied");
                DispatchOutcome::Applied { action, process }
            }
            Err(e) => {
                warn!(%action, process = %process, error = %e, "supervisor command failed");
                DispatchOutcome::Failed {
                    action,
                    process,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Consume `feed` until `cancel` fires. The feed resubscribes on its
    /// own when the store connection drops.
    pub async fn run(&self, mut feed: ControlFeed, cancel: CancellationToken) {
        info!(
            host = %self.identity.host,
            channel = feed.channel(),
            bindings = self.bindings.len(),
            fallback = self.bindings.fallback(),
            "command dispatcher started"
        );
        if self.bindings.is_empty() {
            warn!("no port bindings configured, every command targets the fallback process");
        }
        while let Some(msg) = feed.next(&cancel).await {
            let outcome = self.dispatch(&msg.payload).await;
            debug!(channel = %msg.channel, ?outcome, "control message handled");
        }
        debug!("command dispatcher stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use nodectl_store::{MemoryBackend, Store};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::CoreError;
    use crate::feed::ResubscribeConfig;
    use crate::message::CONTROL_CHANNEL;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Start(String),
        Stop(String),
        Status(String),
    }

    /// Records every call and tracks which processes are running.
    #[derive(Default)]
    pub(crate) struct RecordingSupervisor {
        pub calls: Mutex<Vec<Call>>,
        pub running: Mutex<HashSet<String>>,
        pub status_text: Mutex<String>,
        pub fail: bool,
    }

    impl RecordingSupervisor {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Supervisor for RecordingSupervisor {
        async fn start(&self, name: &str) -> Result<(), CoreError> {
            self.calls.lock().unwrap().push(Call::Start(name.into()));
            if self.fail {
                return Err(CoreError::Supervisor {
                    process: name.into(),
                    message: "boom".into(),
                });
            }
            self.running.lock().unwrap().insert(name.into());
            Ok(())
        }

        async fn stop(&self, name: &str) -> Result<(), CoreError> {
            self.calls.lock().unwrap().push(Call::Stop(name.into()));
            self.running.lock().unwrap().remove(name);
            Ok(())
        }

        async fn status(&self, name: &str) -> Result<String, CoreError> {
            self.calls.lock().unwrap().push(Call::Status(name.into()));
            Ok(self.status_text.lock().unwrap().clone())
        }
    }

    const LOCAL: &str = "10.0.0.7";

    fn dispatcher(supervisor: Arc<RecordingSupervisor>) -> Dispatcher {
        Dispatcher::new(
            NodeIdentity::new(LOCAL, "8080"),
            ProcessBinding::default(),
            supervisor,
        )
    }

    #[tokio::test]
    async fn port_selects_bound_process() {
        let sup = Arc::new(RecordingSupervisor::default());
        let d = dispatcher(Arc::clone(&sup));

        d.dispatch(r#"{"action":"active","server":"10.0.0.7:1935"}"#).await;
        d.dispatch(r#"{"action":"active","server":"10.0.0.7:1954"}"#).await;
        d.dispatch(r#"{"action":"inactive","server":"10.0.0.7:9999"}"#).await;

        assert_eq!(
            sup.calls(),
            vec![
                Call::Start("live-srs".into()),
                Call::Start("cdn-main".into()),
                Call::Stop("pegatv-transcode-dev-live-1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn repeated_start_is_issued_twice() {
        let sup = Arc::new(RecordingSupervisor::default());
        let d = dispatcher(Arc::clone(&sup));
        let payload = r#"{"action":"active","server":"10.0.0.7:1954"}"#;

        let first = d.dispatch(payload).await;
        let second = d.dispatch(payload).await;

        let applied = DispatchOutcome::Applied {
            action: Action::Active,
            process: "cdn-main".into(),
        };
        assert_eq!(first, applied);
        assert_eq!(second, applied);
        assert_eq!(
            sup.calls(),
            vec![Call::Start("cdn-main".into()), Call::Start("cdn-main".into())]
        );
        assert!(sup.running.lock().unwrap().contains("cdn-main"));
    }

    #[tokio::test]
    async fn other_hosts_and_blank_server_are_ignored() {
        let sup = Arc::new(RecordingSupervisor::default());
        let d = dispatcher(Arc::clone(&sup));

        assert_eq!(
            d.dispatch(r#"{"action":"active","server":"10.0.0.8:1935"}"#).await,
            DispatchOutcome::Ignored
        );
        assert_eq!(d.dispatch(r#"{"action":"active"}"#).await, DispatchOutcome::Ignored);
        assert_eq!(
            d.dispatch(r#"{"action":"active","server":""}"#).await,
            DispatchOutcome::Ignored
        );
        assert!(sup.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_action_reaches_applied_without_supervisor() {
        let sup = Arc::new(RecordingSupervisor::default());
        let d = dispatcher(Arc::clone(&sup));

        let outcome = d
            .dispatch(r#"{"action":"restart","server":"10.0.0.7:2443"}"#)
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Applied {
                action: Action::Other,
                process: "live-cdn".into()
            }
        );
        assert!(sup.calls().is_empty());
    }

    #[tokio::test]
    async fn supervisor_failure_is_reported_not_raised() {
        let sup = Arc::new(RecordingSupervisor {
            fail: true,
            ..RecordingSupervisor::default()
        });
        let d = dispatcher(Arc::clone(&sup));

        let outcome = d
            .dispatch(r#"{"action":"active","server":"10.0.0.7:1935"}"#)
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed { ref process, .. } if process == "live-srs"));
    }

    #[tokio::test]
    async fn malformed_payloads_do_not_stop_the_loop() {
        let store = Arc::new(Store::new(MemoryBackend::new()));
        let sup = Arc::new(RecordingSupervisor::default());
        let d = Arc::new(dispatcher(Arc::clone(&sup)));
        let cancel = CancellationToken::new();

        let mut feed = ControlFeed::new(Arc::clone(&store), CONTROL_CHANNEL, ResubscribeConfig::default());
        feed.open().await.unwrap();
        let task = {
            let d = Arc::clone(&d);
            let cancel = cancel.clone();
            tokio::spawn(async move { d.run(feed, cancel).await })
        };

        for payload in ["{", "null", r#"{"action":[]}"#, "\u{1F600}"] {
            store.publish(CONTROL_CHANNEL, payload).await.unwrap();
        }
        store
            .publish(CONTROL_CHANNEL, r#"{"action":"active","server":"10.0.0.7:1935"}"#)
            .await
            .unwrap();

        for _ in 0..100 {
            if !sup.calls().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sup.calls(), vec![Call::Start("live-srs".into())]);

        cancel.cancel();
        task.await.unwrap();
    }
}
