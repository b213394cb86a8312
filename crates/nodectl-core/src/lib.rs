//! Node-local control agent: command dispatch plus usage and health reporting.
//!
//! ```text
//!            ┌──────────── Arc<Store> ────────────┐
//!            │                                    │
//!       ControlFeed ──► Dispatcher ──► Supervisor (pm2)
//!            │                            ▲
//!   UsageReporter ◄── metrics source      │
//!            │                      HealthReporter ──► callback sink
//!            └── usage key
//! ```
//!
//! [`Agent::start`] spawns all three tasks; [`AgentHandle::shutdown`] stops
//! them.

pub mod agent;
pub mod binding;
pub mod callback;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod health;
pub mod message;
pub mod metrics;
pub mod supervisor;
pub mod transport;
pub mod usage;

// ── Primary re-exports ──────────────────────────────────────────────
pub use agent::{Agent, AgentConfig, AgentHandle};
pub use binding::{DEFAULT_PROCESS, NodeIdentity, ProcessBinding, USAGE_KEY_PREFIX};
pub use callback::CallbackClient;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::CoreError;
pub use feed::{ControlFeed, ResubscribeConfig};
pub use health::{HealthReporter, HealthStatus, ProcessState, classify};
pub use message::{Action, CONTROL_CHANNEL, ControlMessage, ServerAddr};
pub use metrics::{DEFAULT_METRICS_ENDPOINT, Metric, MetricsClient};
pub use supervisor::{Pm2Supervisor, Supervisor};
pub use transport::{TlsMode, TransportConfig};
pub use usage::{NetUsage, ResourceSnapshot, UsageReporter};
