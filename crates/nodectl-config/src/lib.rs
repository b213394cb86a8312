//! Configuration for the nodectl agent.
//!
//! Layers, lowest to highest: built-in defaults, an optional TOML file,
//! `NODECTL_*` variables (`__` separates sections), and finally the
//! deployment variables the agent has always read (`REDIS_SERVER`,
//! `SERVER_ENDPOINT`, `CMS_ENDPOINT`, ...). Values that fail to parse
//! degrade to empty or zero instead of aborting startup.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

use nodectl_core::{
    AgentConfig, CONTROL_CHANNEL, DEFAULT_METRICS_ENDPOINT, DEFAULT_PROCESS, NodeIdentity,
    ProcessBinding, ResubscribeConfig, TlsMode,
};
use nodectl_store::{ProbePolicy, StoreConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Everything the agent reads at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub node: NodeSettings,
    pub reporting: ReportingSettings,
    pub control: ControlSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// `host:port` endpoints. A comma-separated string is accepted.
    #[serde(deserialize_with = "lenient::list")]
    pub servers: Vec<String>,
    #[serde(deserialize_with = "lenient::opt_string", skip_serializing)]
    pub password: Option<String>,
    #[serde(deserialize_with = "lenient::int")]
    pub db: i64,
    #[serde(deserialize_with = "lenient::opt_string")]
    pub master_name: Option<String>,
    #[serde(deserialize_with = "lenient::list")]
    pub sentinel_addrs: Vec<String>,
    /// `fail-fast` or `degraded`.
    pub probe_policy: String,
    pub connect_timeout_secs: u64,
    pub response_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            password: None,
            db: 0,
            master_name: None,
            sentinel_addrs: Vec::new(),
            probe_policy: ProbePolicy::default().to_string(),
            connect_timeout_secs: 3,
            response_timeout_secs: 5,
        }
    }
}

/// This node's identity as seen by publishers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSettings {
    #[serde(deserialize_with = "lenient::string")]
    pub endpoint: String,
    #[serde(deserialize_with = "lenient::string")]
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportingSettings {
    pub usage_interval_secs: u64,
    pub health_interval_secs: u64,
    #[serde(deserialize_with = "lenient::string")]
    pub metrics_endpoint: String,
    pub metrics_timeout_secs: u64,
    /// Management service root; `api/callback/server` is appended.
    #[serde(deserialize_with = "lenient::string")]
    pub callback_endpoint: String,
    pub callback_timeout_secs: u64,
    /// Accept self-signed certificates on outbound HTTPS.
    pub insecure: bool,
    pub health_process: String,
    pub health_port: u16,
}

impl Default for ReportingSettings {
    fn default() -> Self {
        Self {
            usage_interval_secs: 1,
            health_interval_secs: 30,
            metrics_endpoint: DEFAULT_METRICS_ENDPOINT.into(),
            metrics_timeout_secs: 3,
            callback_endpoint: String::new(),
            callback_timeout_secs: 5,
            insecure: false,
            health_process: "live-cdn".into(),
            health_port: 2443,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlSettings {
    pub channel: String,
    /// Port → process name. Keys are port numbers as text. File entries
    /// extend the built-in table.
    pub bindings: BTreeMap<String, String>,
    pub default_process: String,
    pub supervisor_program: String,
    pub supervisor_timeout_secs: u64,
    /// First wait before resubscribing to the channel; doubles per failure.
    pub resubscribe_initial_secs: u64,
    pub resubscribe_max_secs: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            channel: CONTROL_CHANNEL.into(),
            bindings: [("1935", "live-srs"), ("1954", "cdn-main"), ("2443", "live-cdn")]
                .into_iter()
                .map(|(port, name)| (port.to_owned(), name.to_owned()))
                .collect(),
            default_process: DEFAULT_PROCESS.into(),
            supervisor_program: "pm2".into(),
            supervisor_timeout_secs: 30,
            resubscribe_initial_secs: 1,
            resubscribe_max_secs: 30,
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// Deployment variables and the settings they fill.
const DEPLOYMENT_ENV: [(&str, &str); 9] = [
    ("REDIS_SERVER", "store.servers"),
    ("REDIS_PASSWORD", "store.password"),
    ("REDIS_DB", "store.db"),
    ("REDIS_MASTER_NAME", "store.master_name"),
    ("REDIS_SENTINEL_ADDRS", "store.sentinel_addrs"),
    ("SERVER_ENDPOINT", "node.endpoint"),
    ("SERVER_PORT", "node.port"),
    ("CMS_ENDPOINT", "reporting.callback_endpoint"),
    ("METRICS_ENDPOINT", "reporting.metrics_endpoint"),
];

/// The layered provider stack, before extraction.
///
/// Deployment variables are taken verbatim as text, so values such as a
/// password of `007` or a port of `08080` reach the settings unchanged.
/// `NODECTL_*` values are parsed as TOML-like scalars by figment.
pub fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::new().merge(Serialized::defaults(Settings::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("NODECTL_").ignore(&["CONFIG"]).split("__"));

    for (name, path) in DEPLOYMENT_ENV {
        if let Some(value) = deployment_var(name) {
            figment = figment.merge(Serialized::default(path, value));
        }
    }
    figment
}

fn deployment_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => Some(value),
        Err(std::env::VarError::NotPresent) => None,
        Err(std::env::VarError::NotUnicode(_)) => {
            warn!(variable = name, "ignoring non UTF-8 environment variable");
            None
        }
    }
}

/// Load settings from defaults, `path` (if any) and the environment.
///
/// A missing file is not an error.
pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
    Ok(figment(path).extract()?)
}

/// Effective settings as TOML. The store password is never written.
pub fn render(settings: &Settings) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(settings)?)
}

// ── Translation ─────────────────────────────────────────────────────

fn secs(field: &str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1 second"));
    }
    Ok(Duration::from_secs(value))
}

impl Settings {
    /// Store connection settings. Endpoint validity is checked when the
    /// store is opened, not here.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let store = &self.store;
        let probe_policy = store
            .probe_policy
            .parse::<ProbePolicy>()
            .map_err(|_| {
                invalid(
                    "store.probe_policy",
                    format!("expected 'fail-fast' or 'degraded', got '{}'", store.probe_policy),
                )
            })?;

        Ok(StoreConfig {
            addrs: store.servers.clone(),
            password: store
                .password
                .clone()
                .filter(|p| !p.is_empty())
                .map(SecretString::from),
            db: store.db,
            master_name: store.master_name.clone(),
            sentinel_addrs: store.sentinel_addrs.clone(),
            probe_policy,
            connect_timeout: secs("store.connect_timeout_secs", store.connect_timeout_secs)?,
            response_timeout: secs("store.response_timeout_secs", store.response_timeout_secs)?,
        })
    }

    /// Agent task settings.
    ///
    /// An unparsable callback endpoint is logged and treated as absent.
    pub fn agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let reporting = &self.reporting;
        let control = &self.control;

        let ports = control
            .bindings
            .iter()
            .map(|(port, name)| {
                port.trim()
                    .parse::<u16>()
                    .map(|port| (port, name.clone()))
                    .map_err(|_| invalid("control.bindings", format!("'{port}' is not a port")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let callback_base = match reporting.callback_endpoint.trim() {
            "" => None,
            raw => match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(endpoint = raw, error = %e, "ignoring unparsable callback endpoint");
                    None
                }
            },
        };

        Ok(AgentConfig {
            identity: NodeIdentity::new(self.node.endpoint.trim(), self.node.port.trim()),
            bindings: ProcessBinding::new(ports, control.default_process.clone()),
            channel: control.channel.clone(),
            resubscribe: ResubscribeConfig {
                initial_delay: secs(
                    "control.resubscribe_initial_secs",
                    control.resubscribe_initial_secs,
                )?,
                max_delay: secs("control.resubscribe_max_secs", control.resubscribe_max_secs)?,
            },
            usage_interval: secs("reporting.usage_interval_secs", reporting.usage_interval_secs)?,
            health_interval: secs(
                "reporting.health_interval_secs",
                reporting.health_interval_secs,
            )?,
            metrics_endpoint: reporting.metrics_endpoint.clone(),
            metrics_timeout: secs("reporting.metrics_timeout_secs", reporting.metrics_timeout_secs)?,
            callback_base,
            callback_timeout: secs(
                "reporting.callback_timeout_secs",
                reporting.callback_timeout_secs,
            )?,
            tls: if reporting.insecure {
                TlsMode::DangerAcceptInvalid
            } else {
                TlsMode::System
            },
            health_process: reporting.health_process.clone(),
            health_port: reporting.health_port,
        })
    }

    pub fn supervisor_timeout(&self) -> Result<Duration, ConfigError> {
        secs(
            "control.supervisor_timeout_secs",
            self.control.supervisor_timeout_secs,
        )
    }
}

// ── Lenient deserializers ───────────────────────────────────────────

mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Int(i64),
        Float(f64),
        Bool(bool),
        Text(String),
    }

    impl Scalar {
        fn into_text(self) -> String {
            match self {
                Self::Int(n) => n.to_string(),
                Self::Float(f) => f.to_string(),
                Self::Bool(b) => b.to_string(),
                Self::Text(s) => s,
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrScalar {
        List(Vec<Scalar>),
        One(Scalar),
    }

    /// Any scalar as text.
    pub fn string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
        Ok(Option::<Scalar>::deserialize(de)?
            .map(Scalar::into_text)
            .unwrap_or_default())
    }

    /// Any scalar as text; empty text becomes `None`.
    pub fn opt_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        Ok(Some(string(de)?).filter(|s| !s.trim().is_empty()))
    }

    /// Integer, or text holding one. Anything else is zero.
    pub fn int<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
        Ok(match Option::<Scalar>::deserialize(de)? {
            Some(Scalar::Int(n)) => n,
            Some(Scalar::Text(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        })
    }

    /// A list, or comma-separated text. Blank entries are dropped.
    pub fn list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
        let items = match Option::<ListOrScalar>::deserialize(de)? {
            None => Vec::new(),
            Some(ListOrScalar::List(items)) => items.into_iter().map(Scalar::into_text).collect(),
            Some(ListOrScalar::One(one)) => one
                .into_text()
                .split(',')
                .map(str::to_owned)
                .collect(),
        };
        Ok(items
            .into_iter()
            .map(|item| item.trim().to_owned())
            .filter(|item| !item.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    fn load_in_jail() -> Result<Settings, figment::Error> {
        load(Some(Path::new("nodectl.toml"))).map_err(|e| e.to_string().into())
    }

    #[test]
    fn defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let settings = load(None).map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.reporting.metrics_endpoint, DEFAULT_METRICS_ENDPOINT);
            Ok(())
        });
    }

    #[test]
    fn deployment_variables_fill_settings() {
        Jail::expect_with(|jail| {
            jail.set_env("REDIS_SERVER", "10.0.0.1:7000,10.0.0.2:7000, ,10.0.0.3:7000");
            jail.set_env("REDIS_PASSWORD", "12345");
            jail.set_env("REDIS_DB", "2");
            jail.set_env("SERVER_ENDPOINT", "edge-7.example");
            jail.set_env("SERVER_PORT", "8080");
            jail.set_env("CMS_ENDPOINT", "https://cms.example/");

            let settings = load_in_jail()?;
            assert_eq!(
                settings.store.servers,
                vec!["10.0.0.1:7000", "10.0.0.2:7000", "10.0.0.3:7000"]
            );
            assert_eq!(settings.store.password.as_deref(), Some("12345"));
            assert_eq!(settings.store.db, 2);
            assert_eq!(settings.node.endpoint, "edge-7.example");
            assert_eq!(settings.node.port, "8080");

            let agent = settings.agent_config().map_err(|e| e.to_string())?;
            assert_eq!(agent.identity.usage_key(), "ovp_nodejs:Server:resource:edge-7.example:8080");
            assert_eq!(
                agent.callback_base.map(String::from).as_deref(),
                Some("https://cms.example/")
            );
            Ok(())
        });
    }

    #[test]
    fn deployment_variables_keep_their_text() {
        Jail::expect_with(|jail| {
            jail.set_env("REDIS_PASSWORD", "007");
            jail.set_env("SERVER_ENDPOINT", "10.0.0.7");
            jail.set_env("SERVER_PORT", "08080");
            jail.set_env("REDIS_SERVER", "6379");

            let settings = load_in_jail()?;
            assert_eq!(settings.store.password.as_deref(), Some("007"));
            assert_eq!(settings.store.servers, vec!["6379"]);

            let agent = settings.agent_config().map_err(|e| e.to_string())?;
            assert_eq!(
                agent.identity.usage_key(),
                "ovp_nodejs:Server:resource:10.0.0.7:08080"
            );
            Ok(())
        });
    }

    #[test]
    fn unparsable_values_degrade() {
        Jail::expect_with(|jail| {
            jail.set_env("REDIS_DB", "not-a-number");
            jail.set_env("CMS_ENDPOINT", "::nope::");

            let settings = load_in_jail()?;
            assert_eq!(settings.store.db, 0);
            assert!(settings.store.servers.is_empty());

            let agent = settings.agent_config().map_err(|e| e.to_string())?;
            assert!(agent.callback_base.is_none());
            Ok(())
        });
    }

    #[test]
    fn toml_file_and_environment_layer() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "nodectl.toml",
                r#"
                [store]
                servers = ["10.0.0.9:6379"]
                master_name = "mymaster"
                probe_policy = "degraded"

                [reporting]
                health_interval_secs = 10

                [control]
                default_process = "fallback"

                [control.bindings]
                8443 = "edge-proxy"
                "#,
            )?;
            jail.set_env("NODECTL_REPORTING__HEALTH_PORT", "8443");
            jail.set_env("REDIS_SENTINEL_ADDRS", "10.0.0.20:26379,10.0.0.21:26379");

            let settings = load_in_jail()?;
            let store = settings.store_config().map_err(|e| e.to_string())?;
            assert_eq!(store.addrs, vec!["10.0.0.9:6379"]);
            assert_eq!(store.master(), Some("mymaster"));
            assert_eq!(store.sentinel_addrs.len(), 2);
            assert_eq!(store.probe_policy, ProbePolicy::Degraded);

            let agent = settings.agent_config().map_err(|e| e.to_string())?;
            assert_eq!(agent.health_interval, Duration::from_secs(10));
            assert_eq!(agent.resubscribe, ResubscribeConfig::default());
            assert_eq!(agent.health_port, 8443);
            assert_eq!(agent.bindings.resolve(Some(8443)), "edge-proxy");
            assert_eq!(agent.bindings.resolve(Some(1935)), "live-srs");
            assert_eq!(agent.bindings.resolve(Some(7)), "fallback");
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut settings = Settings::default();
        settings.store.probe_policy = "sometimes".into();
        assert!(matches!(
            settings.store_config(),
            Err(ConfigError::Validation { ref field, .. }) if field == "store.probe_policy"
        ));

        let mut settings = Settings::default();
        settings.reporting.usage_interval_secs = 0;
        assert!(settings.agent_config().is_err());

        let mut settings = Settings::default();
        settings.control.bindings.insert("http".into(), "x".into());
        assert!(settings.agent_config().is_err());
    }

    #[test]
    fn render_omits_password() {
        let mut settings = Settings::default();
        settings.store.password = Some("hunter2".into());
        let text = render(&settings).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("[store]"));
    }
}
