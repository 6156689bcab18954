//! PollingOrchestrator - Concurrent Camera Fleet Polling
//!
//! ## Responsibilities
//!
//! - Fixed-cadence polling loop with drift correction
//! - One concurrent unit of work per camera per tick (bounded fan-out, join barrier)
//! - Per-camera retry of transient fetch failures
//! - Failure escalation to a remote reboot, followed by a cooldown window
//! - Daily scheduled reboot of the whole fleet
//!
//! ## Per-camera unit of work
//!
//! 1. Cooldown active → skip, no network access
//! 2. Up to `retry_limit` attempts of fetch → decode → estimate
//!    - transient failure: wait `retry_delay`, try again
//!    - decode / back-end failure: abandon this cycle
//! 3. Success → record sample, reset failure count
//! 4. All attempts failed → failure count + 1, reboot when it reaches the threshold

mod schedule;

pub use schedule::DailyRebootSchedule;

use crate::alert_notifier::AlertNotifier;
use crate::camera_rebooter::CameraRebooter;
use crate::camera_registry::{Camera, CameraRegistry};
use crate::camera_state::{CameraState, CameraStateSnapshot, CameraStateStore, PollGate};
use crate::error::{Error, Result};
use crate::frame_sampler::FrameSampler;
use crate::metric_sink::{MetricSink, Sample};
use crate::occupancy_estimator::OccupancyEstimator;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Polling tunables
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between the starts of successive cycles
    pub cadence: Duration,
    /// Per-attempt fetch timeout
    pub fetch_timeout: Duration,
    /// Attempts per camera per cycle (min 1)
    pub retry_limit: u32,
    /// Wait between attempts
    pub retry_delay: Duration,
    /// Failed cycles before a reboot; 0 disables escalation
    pub escalation_threshold: u32,
    /// Polling suppression after a reboot
    pub cooldown: Duration,
    /// Local hour for the fleet reboot; `None` disables it
    pub daily_reboot_hour: Option<u32>,
    /// Time zone of `daily_reboot_hour`
    pub reboot_timezone: Tz,
    /// Wait after a cycle with no cameras
    pub empty_list_backoff: Duration,
    /// Units of work allowed to run at once
    pub max_concurrent_polls: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(5),
            retry_limit: 3,
            retry_delay: Duration::from_secs(1),
            escalation_threshold: 20,
            cooldown: Duration::from_secs(300),
            daily_reboot_hour: Some(3),
            reboot_timezone: chrono_tz::Asia::Tokyo,
            empty_list_backoff: Duration::from_secs(60),
            max_concurrent_polls: 32,
        }
    }
}

/// What happened to one camera in one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Sample produced; `stored` is false when the sink rejected it
    Recorded { count: u32, stored: bool },
    /// Skipped because of a recent reboot
    Suppressed { remaining: Duration },
    /// Non-retryable failure; failure count untouched
    Abandoned { reason: String },
    /// Every attempt failed transiently
    Exhausted { failures: u32, rebooted: bool },
}

/// Why a reboot was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootReason {
    Escalation,
    Daily,
}

impl fmt::Display for RebootReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebootReason::Escalation => write!(f, "escalation"),
            RebootReason::Daily => write!(f, "daily"),
        }
    }
}

/// Summary of one polling cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub cameras: usize,
    pub recorded: usize,
    pub sink_failures: usize,
    pub suppressed: usize,
    pub abandoned: usize,
    pub exhausted: usize,
    pub reboots: usize,
    pub panicked: usize,
    pub elapsed_ms: u64,
}

impl CycleReport {
    fn new(cameras: usize) -> Self {
        Self {
            started_at: Utc::now(),
            cameras,
            ..Default::default()
        }
    }

    fn tally(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Recorded { stored, .. } => {
                self.recorded += 1;
                if !stored {
                    self.sink_failures += 1;
                }
            }
            PollOutcome::Suppressed { .. } => self.suppressed += 1,
            PollOutcome::Abandoned { .. } => self.abandoned += 1,
            PollOutcome::Exhausted { rebooted, .. } => {
                self.exhausted += 1;
                if *rebooted {
                    self.reboots += 1;
                }
            }
        }
    }
}

enum AttemptFailure {
    /// All attempts failed transiently; carries the last error
    Exhausted(Error),
    /// Not worth retrying this cycle
    Fatal(Error),
}

/// PollingOrchestrator instance
pub struct PollingOrchestrator {
    config: PollingConfig,
    registry: Arc<CameraRegistry>,
    sampler: Arc<dyn FrameSampler>,
    estimator: Arc<dyn OccupancyEstimator>,
    sink: Arc<dyn MetricSink>,
    rebooter: Arc<dyn CameraRebooter>,
    notifier: Option<Arc<dyn AlertNotifier>>,
    states: Arc<CameraStateStore>,
    limiter: Arc<Semaphore>,
    daily: Mutex<DailyRebootSchedule>,
    last_report: RwLock<Option<CycleReport>>,
    running: RwLock<bool>,
    shutdown: watch::Sender<bool>,
}

impl PollingOrchestrator {
    /// Create new PollingOrchestrator
    pub fn new(
        config: PollingConfig,
        registry: Arc<CameraRegistry>,
        sampler: Arc<dyn FrameSampler>,
        estimator: Arc<dyn OccupancyEstimator>,
        sink: Arc<dyn MetricSink>,
        rebooter: Arc<dyn CameraRebooter>,
        states: Arc<CameraStateStore>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_polls.max(1)));
        let daily = Mutex::new(DailyRebootSchedule::new(
            config.daily_reboot_hour,
            config.reboot_timezone,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            registry,
            sampler,
            estimator,
            sink,
            rebooter,
            notifier: None,
            states,
            limiter,
            daily,
            last_report: RwLock::new(None),
            running: RwLock::new(false),
            shutdown,
        }
    }

    /// Attach an escalation alert transport
    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Spawn the polling loop
    ///
    /// Clears an earlier stop request; a `stop` issued after this call is
    /// honoured even if the loop has not run yet.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.shutdown.send_replace(false);
        let this = self.clone();
        tokio::spawn(async move { this.run_forever().await })
    }

    /// Stop the loop at the next iteration boundary
    ///
    /// Units of work already dispatched run to completion.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        tracing::info!("Stopping polling orchestrator");
    }

    /// Run the polling loop until `stop` is called
    ///
    /// Returns immediately when a stop is already pending.
    pub async fn run_forever(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Polling already running");
                return;
            }
            *running = true;
        }
        let mut shutdown = self.shutdown.subscribe();

        tracing::info!(
            cadence_sec = self.config.cadence.as_secs_f64(),
            fetch_timeout_sec = self.config.fetch_timeout.as_secs_f64(),
            retry_limit = self.config.retry_limit,
            retry_delay_sec = self.config.retry_delay.as_secs_f64(),
            escalation_threshold = self.config.escalation_threshold,
            cooldown_sec = self.config.cooldown.as_secs(),
            daily_reboot_hour = ?self.config.daily_reboot_hour,
            reboot_timezone = %self.config.reboot_timezone,
            "Starting polling orchestrator"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();

            self.maybe_daily_reboot(Utc::now()).await;

            let cameras = self.registry.reload().await;
            let wait = if cameras.is_empty() {
                tracing::warn!(
                    backoff_sec = self.config.empty_list_backoff.as_secs(),
                    "No cameras to poll, backing off"
                );
                self.config.empty_list_backoff
            } else {
                self.run_cycle(cameras).await;
                self.config.cadence.saturating_sub(started.elapsed())
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => {}
            }
        }

        *self.running.write().await = false;
        tracing::info!("Polling orchestrator stopped");
    }

    /// Poll every camera of `cameras` concurrently and wait for all of them
    pub async fn run_cycle(self: &Arc<Self>, cameras: Arc<Vec<Camera>>) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new(cameras.len());
        let mut units = JoinSet::new();

        for camera in cameras.iter().cloned() {
            let this = self.clone();
            units.spawn(async move {
                // The semaphore is never closed
                let _permit = this.limiter.clone().acquire_owned().await.ok();
                let outcome = this.poll_one(&camera).await;
                (camera, outcome)
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((_, outcome)) => report.tally(&outcome),
                Err(e) => {
                    report.panicked += 1;
                    tracing::error!(error = %e, "Camera unit of work failed");
                }
            }
        }

        if report.panicked > 0 {
            self.settle_phases(&cameras).await;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            cameras = report.cameras,
            recorded = report.recorded,
            suppressed = report.suppressed,
            abandoned = report.abandoned,
            exhausted = report.exhausted,
            reboots = report.reboots,
            elapsed_ms = report.elapsed_ms,
            "Polling cycle finished"
        );

        *self.last_report.write().await = Some(report.clone());
        report
    }

    /// Return cameras whose unit of work died mid-poll to Idle
    async fn settle_phases(&self, cameras: &[Camera]) {
        for camera in cameras {
            if let Some(entry) = self.states.get(&camera.address).await {
                if entry.lock().await.settle() {
                    tracing::debug!(address = %camera.address, "Stale polling phase cleared");
                }
            }
        }
    }

    /// One camera, one cycle
    pub async fn poll_one(&self, camera: &Camera) -> PollOutcome {
        let entry = self.states.get_or_create(&camera.address).await;

        let gate = entry
            .lock()
            .await
            .begin_poll(Instant::now(), self.config.cooldown);
        if let PollGate::Suppressed { remaining } = gate {
            tracing::debug!(
                room = %camera.room,
                address = %camera.address,
                remaining_sec = remaining.as_secs(),
                "Camera in reboot cooldown, skipping"
            );
            return PollOutcome::Suppressed { remaining };
        }

        match self.sample_with_retry(camera).await {
            Ok(count) => self.on_success(camera, &entry, count).await,
            Err(AttemptFailure::Exhausted(e)) => self.on_exhausted(camera, &entry, e).await,
            Err(AttemptFailure::Fatal(e)) => {
                entry.lock().await.record_abandoned();
                tracing::warn!(
                    room = %camera.room,
                    address = %camera.address,
                    error = %e,
                    "Frame unusable, abandoning this cycle"
                );
                PollOutcome::Abandoned {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn sample_with_retry(&self, camera: &Camera) -> std::result::Result<u32, AttemptFailure> {
        let limit = self.config.retry_limit.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.sample_once(camera).await {
                Ok(count) => return Ok(count),
                Err(e) if !e.is_retryable() => return Err(AttemptFailure::Fatal(e)),
                Err(e) => e,
            };

            if attempt >= limit {
                return Err(AttemptFailure::Exhausted(err));
            }

            tracing::warn!(
                room = %camera.room,
                address = %camera.address,
                attempt = attempt,
                retry_limit = limit,
                error = %err,
                "Camera fetch failed, retrying"
            );
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    /// fetch → decode → estimate
    async fn sample_once(&self, camera: &Camera) -> Result<u32> {
        let timeout = self.config.fetch_timeout;

        let frame = tokio::time::timeout(timeout, self.sampler.fetch(&camera.address, timeout))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "{}: no frame within {}s",
                    camera.address,
                    timeout.as_secs_f64()
                ))
            })??;

        self.estimator.estimate(&frame).await
    }

    async fn on_success(
        &self,
        camera: &Camera,
        entry: &Mutex<CameraState>,
        count: u32,
    ) -> PollOutcome {
        let sample = Sample {
            room: camera.room.clone(),
            count,
            captured_at: Utc::now(),
        };

        let stored = match self.sink.record(&sample).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    room = %camera.room,
                    count = count,
                    error = %e,
                    "Failed to record occupancy sample"
                );
                false
            }
        };

        let cleared = entry.lock().await.record_success(count);
        if cleared > 0 {
            tracing::info!(
                room = %camera.room,
                address = %camera.address,
                failures = cleared,
                "Camera recovered"
            );
        }

        tracing::debug!(room = %camera.room, count = count, "People counted");

        PollOutcome::Recorded { count, stored }
    }

    async fn on_exhausted(
        &self,
        camera: &Camera,
        entry: &Mutex<CameraState>,
        last_error: Error,
    ) -> PollOutcome {
        let (failures, escalate) = {
            let mut state = entry.lock().await;
            let escalate = state.record_exhausted(self.config.escalation_threshold);
            (state.consecutive_failures(), escalate)
        };

        tracing::warn!(
            room = %camera.room,
            address = %camera.address,
            failures = failures,
            error = %last_error,
            "Max retries reached, skipping camera this cycle"
        );

        if escalate {
            tracing::error!(
                room = %camera.room,
                address = %camera.address,
                failures = failures,
                "Failure threshold reached, rebooting camera"
            );
            self.issue_reboot(&camera.address, entry, RebootReason::Escalation)
                .await;
            self.alert(&format!(
                "Camera {} ({}) failed {} consecutive polling cycles and was sent a reboot command.",
                camera.room, camera.address, failures
            ))
            .await;
        }

        PollOutcome::Exhausted {
            failures,
            rebooted: escalate,
        }
    }

    /// Send a reboot and start the cooldown. Returns whether the command was accepted.
    async fn issue_reboot(
        &self,
        address: &str,
        entry: &Mutex<CameraState>,
        reason: RebootReason,
    ) -> bool {
        entry.lock().await.mark_rebooted(Instant::now());

        match self.rebooter.reboot(address).await {
            Ok(()) => {
                tracing::info!(address = %address, reason = %reason, "Reboot command sent");
                true
            }
            Err(e) => {
                tracing::warn!(
                    address = %address,
                    reason = %reason,
                    error = %e,
                    "Reboot command failed"
                );
                false
            }
        }
    }

    async fn alert(&self, message: &str) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        if let Err(e) = notifier.notify(message).await {
            tracing::warn!(error = %e, "Failed to send alert");
        }
    }

    /// Reboot every known camera once per local date during the reboot hour
    ///
    /// Returns the number of addresses a reboot was issued to.
    pub async fn maybe_daily_reboot(&self, now: DateTime<Utc>) -> usize {
        let Some(date) = self.daily.lock().await.due_date(now) else {
            return 0;
        };

        let cameras = self.registry.snapshot().await;
        if cameras.is_empty() {
            tracing::debug!(date = %date, "Daily reboot due but no cameras known yet");
            return 0;
        }

        let mut addresses: Vec<&str> = cameras.iter().map(|c| c.address.as_str()).collect();
        addresses.sort_unstable();
        addresses.dedup();

        tracing::info!(date = %date, cameras = addresses.len(), "Issuing daily reboot");

        let reboots = addresses.iter().map(|address| async move {
            let entry = self.states.get_or_create(address).await;
            self.issue_reboot(address, &entry, RebootReason::Daily).await
        });
        let accepted = futures::future::join_all(reboots)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        self.daily.lock().await.mark_done(date);

        tracing::info!(
            date = %date,
            issued = addresses.len(),
            accepted = accepted,
            "Daily reboot finished"
        );

        addresses.len()
    }

    /// Snapshots of all camera records
    pub async fn camera_states(&self) -> Vec<CameraStateSnapshot> {
        self.states.snapshots(self.config.cooldown).await
    }

    /// Report of the most recent completed cycle
    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
