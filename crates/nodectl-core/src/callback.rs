// ── Callback sink client ──

use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::CoreError;
use crate::transport::TransportConfig;

/// Path appended to the management base URL.
pub const CALLBACK_PATH: &str = "api/callback/server";

/// Posts JSON status updates to the management service.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    http: reqwest::Client,
    url: Url,
}

impl CallbackClient {
    /// `base` is the management service root, e.g. `https://cms.example/`.
    pub fn new(base: &Url, transport: &TransportConfig) -> Result<Self, CoreError> {
        Self::from_reqwest(base, transport.build_client()?)
    }

    /// A base without a trailing slash is treated as a directory, so
    /// `https://cms.example/cms` posts to `https://cms.example/cms/api/callback/server`.
    pub fn from_reqwest(base: &Url, http: reqwest::Client) -> Result<Self, CoreError> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let url = base.join(CALLBACK_PATH).map_err(|e| CoreError::Config {
            message: format!("invalid callback base URL '{base}': {e}"),
        })?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST `body` as JSON. Any non-2xx status is an error; the response
    /// body is not read.
    pub async fn post<T: Serialize + Sync>(&self, body: &T) -> Result<(), CoreError> {
        let resp = self.http.post(self.url.clone()).json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        debug!(url = %self.url, %status, "callback delivered");
        Ok(())
    }
}
