//! CameraRegistry - Monitored Camera List
//!
//! ## Responsibilities
//!
//! - Load the camera list (room + address) from static configuration
//! - Hold the current list as an immutable snapshot
//! - Replace the snapshot wholesale on every reload
//!
//! A missing or malformed source never fails the caller: it yields an empty
//! list, which the orchestrator treats as "nothing to poll this cycle".

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Monitored camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    /// Room label used as the metric tag
    pub room: String,
    /// HTTP endpoint for frame capture and reboot commands
    #[serde(alias = "url")]
    pub address: String,
}

impl Camera {
    pub fn new(room: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            address: address.into(),
        }
    }
}

/// Source of the camera list
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Camera>>;
}

/// JSON file source: `[{"room": "...", "url": "..."}, ...]`
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse a camera list document, dropping entries with blank fields.
    pub fn parse(data: &[u8]) -> Result<Vec<Camera>> {
        let cameras: Vec<Camera> = serde_json::from_slice(data)?;

        Ok(cameras
            .into_iter()
            .filter(|c| {
                let valid = !c.room.trim().is_empty() && !c.address.trim().is_empty();
                if !valid {
                    tracing::warn!(
                        room = %c.room,
                        address = %c.address,
                        "Skipping camera entry with empty room or address"
                    );
                }
                valid
            })
            .collect())
    }
}

#[async_trait]
impl CameraSource for JsonFileSource {
    async fn load(&self) -> Result<Vec<Camera>> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            Error::Config(format!(
                "Cannot read camera list {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Self::parse(&data)
    }
}

/// CameraRegistry instance
pub struct CameraRegistry {
    source: Arc<dyn CameraSource>,
    current: RwLock<Arc<Vec<Camera>>>,
}

impl CameraRegistry {
    /// Create new CameraRegistry with an empty snapshot
    pub fn new(source: Arc<dyn CameraSource>) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Reload from the source and return the new snapshot
    ///
    /// Load failures are logged and produce an empty snapshot.
    pub async fn reload(&self) -> Arc<Vec<Camera>> {
        let cameras = match self.source.load().await {
            Ok(cameras) => cameras,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load camera list");
                Vec::new()
            }
        };

        let snapshot = Arc::new(cameras);
        *self.current.write().await = snapshot.clone();

        tracing::debug!(cameras = snapshot.len(), "Camera list reloaded");

        snapshot
    }

    /// Current snapshot (fast read)
    pub async fn snapshot(&self) -> Arc<Vec<Camera>> {
        self.current.read().await.clone()
    }
}
