// Shared transport configuration for building reqwest::Client instances.
//
// The metrics and callback clients differ only in timeout, so both are
// built through this one place.

use std::time::Duration;

use crate::error::CoreError;

const USER_AGENT: &str = concat!("nodectl/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode for outbound HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the bundled root certificates.
    #[default]
    System,
    /// Accept any certificate (for self-signed management endpoints).
    DangerAcceptInvalid,
}

/// Settings shared by every outbound HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, CoreError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        if self.tls == TlsMode::DangerAcceptInvalid {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build().map_err(|e| CoreError::Config {
            message: format!("failed to build HTTP client: {e}"),
        })
    }
}
