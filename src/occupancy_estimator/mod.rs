//! OccupancyEstimator - Person Count from a Frame
//!
//! ## Responsibilities
//!
//! - Validate that frame bytes decode into an image (blocking pool)
//! - Send the frame to the object detector service
//! - Count detections of the configured class
//!
//! Decode failures are reported as `Error::Decode`. Detector outages are
//! `Error::Estimator` and never count against the camera.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Occupancy estimation capability
#[async_trait]
pub trait OccupancyEstimator: Send + Sync {
    /// Number of persons visible in `frame`
    async fn estimate(&self, frame: &[u8]) -> Result<u32>;
}

/// Bounding box returned by the detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BBox {
    pub label: String,
    pub conf: f32,

    #[serde(default)]
    pub x1: f32,
    #[serde(default)]
    pub y1: f32,
    #[serde(default)]
    pub x2: f32,
    #[serde(default)]
    pub y2: f32,
}

/// Detector response (`POST /v1/detect`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub bboxes: Vec<BBox>,

    #[serde(default)]
    pub model_version: Option<String>,
}

/// Count boxes of `class` with at least `min_confidence`
pub fn count_matching(bboxes: &[BBox], class: &str, min_confidence: f32) -> u32 {
    bboxes
        .iter()
        .filter(|b| b.label == class && b.conf >= min_confidence)
        .count() as u32
}

/// Decode `frame` and return its dimensions
///
/// CPU-bound; runs on the blocking pool so other cameras keep progressing.
pub async fn decode_dimensions(frame: &[u8]) -> Result<(u32, u32)> {
    let data = frame.to_vec();

    let (width, height) = tokio::task::spawn_blocking(move || {
        image::load_from_memory(&data).map(|img| (img.width(), img.height()))
    })
    .await
    .map_err(|e| Error::Internal(format!("decode task failed: {}", e)))?
    .map_err(|e| Error::Decode(e.to_string()))?;

    if width == 0 || height == 0 {
        return Err(Error::Decode(format!("empty image {}x{}", width, height)));
    }

    Ok((width, height))
}

/// HTTP object-detector client
pub struct DetectorClient {
    client: reqwest::Client,
    base_url: String,
    target_class: String,
    min_confidence: f32,
}

impl DetectorClient {
    /// Create new detector client
    pub fn new(base_url: String, target_class: String, min_confidence: f32) -> Result<Self> {
        Self::with_timeout(base_url, target_class, min_confidence, Duration::from_secs(30))
    }

    /// Create new detector client with custom timeout
    pub fn with_timeout(
        base_url: String,
        target_class: String,
        min_confidence: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            target_class,
            min_confidence,
        })
    }

    /// Check detector health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn detect(&self, frame: Vec<u8>) -> Result<DetectResponse> {
        let url = format!("{}/v1/detect", self.base_url);

        let part = Part::bytes(frame)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| Error::Estimator(format!("multipart: {}", e)))?;
        let form = Form::new()
            .part("image", part)
            .text("classes", self.target_class.clone());

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Estimator(format!("detector unreachable: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Estimator(format!(
                "detector failed: {} - {}",
                status, body
            )));
        }

        resp.json::<DetectResponse>()
            .await
            .map_err(|e| Error::Estimator(format!("detector response: {}", e)))
    }
}

#[async_trait]
impl OccupancyEstimator for DetectorClient {
    async fn estimate(&self, frame: &[u8]) -> Result<u32> {
        let (width, height) = decode_dimensions(frame).await?;

        let result = self.detect(frame.to_vec()).await?;
        let count = count_matching(&result.bboxes, &self.target_class, self.min_confidence);

        tracing::debug!(
            width = width,
            height = height,
            boxes = result.bboxes.len(),
            count = count,
            model_version = ?result.model_version,
            "Frame analyzed"
        );

        Ok(count)
    }
}
