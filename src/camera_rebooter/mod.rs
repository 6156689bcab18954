//! CameraRebooter - Remote Reboot Command
//!
//! Sends a reboot GET to the camera's control endpoint (same address,
//! reboot query). Best-effort: callers log failures and move on, nothing
//! here is retried.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Remote reboot capability
#[async_trait]
pub trait CameraRebooter: Send + Sync {
    async fn reboot(&self, address: &str) -> Result<()>;
}

/// Build the control URL for `address`, replacing any query with `query`
pub fn reboot_url(address: &str, query: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(address)
        .map_err(|e| Error::Reboot(format!("invalid camera address {}: {}", address, e)))?;
    url.set_query(Some(query));
    Ok(url)
}

/// HTTP reboot client
pub struct HttpRebooter {
    client: reqwest::Client,
    query: String,
}

impl HttpRebooter {
    /// Create new HttpRebooter
    ///
    /// `query` is the control query, e.g. `action=reboot`.
    pub fn new(query: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, query })
    }
}

#[async_trait]
impl CameraRebooter for HttpRebooter {
    async fn reboot(&self, address: &str) -> Result<()> {
        let url = reboot_url(address, &self.query)?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Reboot(format!("{}: {}", address, e)))?;

        if !resp.status().is_success() {
            return Err(Error::Reboot(format!(
                "{} answered {}",
                address,
                resp.status()
            )));
        }

        Ok(())
    }
}
