//! Occupancy Poller Library
//!
//! Counts people in front of a fleet of network cameras and records the counts
//! as a time series.
//!
//! ## Architecture (8 Components)
//!
//! 1. CameraRegistry - Camera list, re-read every cycle
//! 2. FrameSampler - Still-frame fetch from a camera
//! 3. OccupancyEstimator - Frame decode and person count
//! 4. MetricSink - InfluxDB writer
//! 5. CameraRebooter - Remote reboot command
//! 6. CameraState - Per-camera failure and cooldown bookkeeping
//! 7. PollingOrchestrator - Concurrent fan-out, retry, escalation, daily reboot
//! 8. WebAPI - Status endpoints
//!
//! AlertNotifier (escalation webhook) is optional.

pub mod alert_notifier;
pub mod camera_rebooter;
pub mod camera_registry;
pub mod camera_state;
pub mod frame_sampler;
pub mod metric_sink;
pub mod models;
pub mod occupancy_estimator;
pub mod polling_orchestrator;
pub mod web_api;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
