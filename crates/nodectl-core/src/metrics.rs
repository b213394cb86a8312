// ── Metrics source client ──
//
// Netdata-style `/api/v1/data` queries, one per metric family. Each
// response is `{id, name, result: [f64, ...]}`; the first sample wins.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::CoreError;
use crate::transport::TransportConfig;

/// Default local metrics endpoint.
pub const DEFAULT_METRICS_ENDPOINT: &str = "http://127.0.0.1:19999/api/v1/data";

const COMMON_QUERY: [(&str, &str); 5] = [
    ("format", "array"),
    ("points", "1"),
    ("group", "average"),
    ("gtime", "0"),
    ("after", "-1"),
];

/// The four sampled metric families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Metric {
    /// RAM in use, as a percentage.
    Memory,
    Cpu,
    /// Network bytes received.
    Inbound,
    /// Network bytes sent.
    Outbound,
}

impl Metric {
    fn chart(self) -> &'static str {
        match self {
            Self::Memory => "system.ram",
            Self::Cpu => "system.cpu",
            Self::Inbound | Self::Outbound => "system.net",
        }
    }

    fn options(self) -> &'static str {
        match self {
            Self::Memory => "absolute|percentage|jsonwrap|nonzero",
            Self::Cpu | Self::Inbound | Self::Outbound => "absolute|jsonwrap|nonzero",
        }
    }

    fn dimensions(self) -> Option<&'static str> {
        match self {
            Self::Memory => Some("used|buffers|active|wired"),
            Self::Cpu => None,
            Self::Inbound => Some("received"),
            Self::Outbound => Some("sent"),
        }
    }

    /// Full query string parameters selecting this metric.
    pub fn query(self) -> Vec<(&'static str, &'static str)> {
        let mut query = vec![("chart", self.chart())];
        query.extend(COMMON_QUERY);
        query.push(("options", self.options()));
        if let Some(dimensions) = self.dimensions() {
            query.push(("dimensions", dimensions));
        }
        query
    }
}

#[derive(Debug, Deserialize)]
struct Sample {
    #[serde(default)]
    result: Vec<f64>,
}

/// Fetches single metric samples over HTTP.
#[derive(Debug, Clone)]
pub struct MetricsClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl MetricsClient {
    pub fn new(endpoint: Url, transport: &TransportConfig) -> Result<Self, CoreError> {
        Ok(Self::from_reqwest(endpoint, transport.build_client()?))
    }

    /// Wrap an existing client (tests, shared pools).
    pub fn from_reqwest(endpoint: Url, http: reqwest::Client) -> Self {
        Self { http, endpoint }
    }

    /// Sample `metric` once.
    ///
    /// Transport errors, non-2xx statuses, unparsable bodies and empty
    /// `result` arrays are all errors.
    pub async fn fetch(&self, metric: Metric) -> Result<f64, CoreError> {
        let resp = self
            .http
            .get(self.endpoint.clone())
            .query(&metric.query())
            .send()
            .await?;

        let status = resp.status();
        let url = resp.url().to_string();
        if !status.is_success() {
            return Err(CoreError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.text().await?;
        let sample: Sample =
            serde_json::from_str(&body).map_err(|e| CoreError::InvalidResponse {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let value = sample
            .result
            .first()
            .copied()
            .ok_or_else(|| CoreError::InvalidResponse {
                url,
                message: format!("no samples for {metric}"),
            })?;
        debug!(%metric, value, "metric sampled");
        Ok(value)
    }
}
