//! FrameSampler - Single Frame Capture over HTTP
//!
//! ## Responsibilities
//!
//! - GET one still image from a camera address
//! - Enforce the per-request timeout
//! - Classify failures as Timeout / Transport / HttpStatus
//!
//! No retries happen here; the retry policy belongs to the orchestrator.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Frame capture capability
#[async_trait]
pub trait FrameSampler: Send + Sync {
    /// Fetch raw image bytes from `address`, giving up after `timeout`
    async fn fetch(&self, address: &str, timeout: Duration) -> Result<Vec<u8>>;
}

/// HTTP snapshot sampler
pub struct HttpFrameSampler {
    client: reqwest::Client,
}

impl HttpFrameSampler {
    /// Create new HttpFrameSampler
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FrameSampler for HttpFrameSampler {
    async fn fetch(&self, address: &str, timeout: Duration) -> Result<Vec<u8>> {
        // Request timeout covers connect through the end of the body
        let resp = self
            .client
            .get(address)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::from_fetch(address, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: address.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::from_fetch(address, e))?;

        tracing::trace!(address = %address, size = bytes.len(), "Frame fetched");

        Ok(bytes.to_vec())
    }
}
