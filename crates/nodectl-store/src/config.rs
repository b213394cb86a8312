// ── Store connection configuration ──
//
// Describes *where* the store lives. Carries credentials and tuning but
// never touches the network; `Store::connect` turns it into a backend.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::StoreError;

/// Default Redis port when an endpoint omits one.
pub const DEFAULT_PORT: u16 = 6379;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deployment shape of the backing store. Exactly one is active per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Topology {
    Standalone,
    Cluster,
    Sentinel,
}

/// What to do when the connectivity check fails during construction.
///
/// Applied uniformly to every topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ProbePolicy {
    /// Abort construction with [`StoreError::Connection`].
    #[default]
    FailFast,
    /// Log the failure and hand out the handle anyway; operations fail
    /// individually until the store becomes reachable.
    Degraded,
}

/// Configuration for connecting to one store deployment.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Data endpoints (`host:port`). One → standalone, several → cluster.
    pub addrs: Vec<String>,
    /// Optional credential, shared by every node.
    pub password: Option<SecretString>,
    /// Logical database index (ignored by clusters).
    pub db: i64,
    /// Sentinel master set name. When present, topology is sentinel.
    pub master_name: Option<String>,
    /// Sentinel endpoints. Falls back to `addrs` when empty.
    pub sentinel_addrs: Vec<String>,
    pub probe_policy: ProbePolicy,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Per-command read/write timeout.
    pub response_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addrs: Vec::new(),
            password: None,
            db: 0,
            master_name: None,
            sentinel_addrs: Vec::new(),
            probe_policy: ProbePolicy::default(),
            connect_timeout: CONNECT_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Endpoint list with blank entries removed.
    pub fn endpoints(&self) -> Vec<&str> {
        non_blank(&self.addrs)
    }

    /// Sentinel endpoints, falling back to the data endpoints.
    pub fn sentinel_endpoints(&self) -> Vec<&str> {
        let sentinels = non_blank(&self.sentinel_addrs);
        if sentinels.is_empty() {
            self.endpoints()
        } else {
            sentinels
        }
    }

    /// Sentinel master name, if one is configured and non-blank.
    pub fn master(&self) -> Option<&str> {
        self.master_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Decide which topology this configuration describes.
    ///
    /// An empty endpoint list is a [`StoreError::Configuration`]; a master
    /// name selects sentinel; otherwise the endpoint count decides.
    pub fn topology(&self) -> Result<Topology, StoreError> {
        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return Err(StoreError::Configuration {
                message: "no store endpoints configured".into(),
            });
        }

        if self.master().is_some() {
            return Ok(Topology::Sentinel);
        }

        Ok(if endpoints.len() == 1 {
            Topology::Standalone
        } else {
            Topology::Cluster
        })
    }
}

fn non_blank(addrs: &[String]) -> Vec<&str> {
    addrs
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect()
}

/// Split a `host:port` endpoint, defaulting the port to [`DEFAULT_PORT`].
///
/// Accepts an optional `redis://` prefix and bracketed IPv6 hosts.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16), StoreError> {
    let raw = endpoint.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("redis://{raw}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| StoreError::Configuration {
        message: format!("invalid store endpoint '{raw}': {e}"),
    })?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| StoreError::Configuration {
            message: format!("store endpoint '{raw}' has no host"),
        })?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    Ok((host, url.port().unwrap_or(DEFAULT_PORT)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(addrs: &[&str]) -> StoreConfig {
        StoreConfig {
            addrs: addrs.iter().map(ToString::to_string).collect(),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn empty_endpoint_list_is_a_configuration_error() {
        let err = config(&[]).topology().unwrap_err();
        assert!(matches!(err, StoreError::Configuration { .. }));
    }

    #[test]
    fn blank_endpoints_count_as_empty() {
        let err = config(&["", "  "]).topology().unwrap_err();
        assert!(matches!(err, StoreError::Configuration { .. }));
    }

    #[test]
    fn single_endpoint_is_standalone() {
        assert_eq!(config(&["10.0.0.1:6379"]).topology().unwrap(), Topology::Standalone);
    }

    #[test]
    fn multiple_endpoints_are_a_cluster() {
        let cfg = config(&["10.0.0.1:7000", "10.0.0.2:7000", "10.0.0.3:7000"]);
        assert_eq!(cfg.topology().unwrap(), Topology::Cluster);
    }

    #[test]
    fn master_name_selects_sentinel() {
        let cfg = StoreConfig {
            master_name: Some("mymaster".into()),
            sentinel_addrs: vec!["10.0.0.9:26379".into()],
            ..config(&["10.0.0.1:6379", "10.0.0.2:6379"])
        };
        assert_eq!(cfg.topology().unwrap(), Topology::Sentinel);
        assert_eq!(cfg.sentinel_endpoints(), vec!["10.0.0.9:26379"]);
    }

    #[test]
    fn blank_master_name_is_ignored() {
        let cfg = StoreConfig {
            master_name: Some("  ".into()),
            ..config(&["10.0.0.1:6379"])
        };
        assert_eq!(cfg.topology().unwrap(), Topology::Standalone);
    }

    #[test]
    fn sentinel_endpoints_fall_back_to_data_endpoints() {
        let cfg = StoreConfig {
            master_name: Some("mymaster".into()),
            ..config(&["10.0.0.1:26379"])
        };
        assert_eq!(cfg.sentinel_endpoints(), vec!["10.0.0.1:26379"]);
    }

    #[test]
    fn parse_endpoint_variants() {
        assert_eq!(parse_endpoint("10.0.0.1:7000").unwrap(), ("10.0.0.1".into(), 7000));
        assert_eq!(parse_endpoint("cache.local").unwrap(), ("cache.local".into(), DEFAULT_PORT));
        assert_eq!(parse_endpoint("redis://cache:6380").unwrap(), ("cache".into(), 6380));
        assert_eq!(parse_endpoint("[::1]:6379").unwrap(), ("::1".into(), 6379));
    }

    #[test]
    fn parse_endpoint_rejects_garbage() {
        assert!(parse_endpoint(":").is_err());
    }

    #[test]
    fn probe_policy_parses_kebab_case() {
        assert_eq!("fail-fast".parse::<ProbePolicy>().unwrap(), ProbePolicy::FailFast);
        assert_eq!("degraded".parse::<ProbePolicy>().unwrap(), ProbePolicy::Degraded);
        assert_eq!(Topology::Sentinel.to_string(), "sentinel");
    }
}
