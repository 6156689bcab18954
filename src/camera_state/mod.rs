//! Camera State
//!
//! Per-address failure and reboot bookkeeping for the polling orchestrator.
//!
//! ## Lifecycle
//!
//! ```text
//!            begin_poll (cooldown expired)
//!   Idle ──────────────► Polling ──► Idle         (success / exhausted / abandoned)
//!    ▲                      │
//!    │                      └──────► CooldownSuppressed   (escalation reboot)
//!    │                                   │
//!    └──── begin_poll after cooldown ────┘
//! ```
//!
//! A daily reboot moves any state to CooldownSuppressed.
//!
//! Records are created lazily on first observation and live for the process
//! lifetime. Each record sits behind its own lock; different addresses never
//! contend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Camera polling phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraPhase {
    /// Waiting for the next tick
    Idle,
    /// A unit of work is in flight
    Polling,
    /// Rebooted recently; polling skipped until cooldown expires
    CooldownSuppressed,
}

impl Default for CameraPhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Result of asking whether a camera may be polled now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollGate {
    Proceed,
    Suppressed { remaining: Duration },
}

/// Mutable per-camera record
#[derive(Debug, Clone, Default)]
pub struct CameraState {
    consecutive_failures: u32,
    last_reboot_at: Option<Instant>,
    last_reboot_wall: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_count: Option<u32>,
    reboots: u64,
    phase: CameraPhase,
}

impl CameraState {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_reboot_at(&self) -> Option<Instant> {
        self.last_reboot_at
    }

    pub fn phase(&self) -> CameraPhase {
        self.phase
    }

    pub fn reboots(&self) -> u64 {
        self.reboots
    }

    /// Remaining cooldown at `now`, if any
    pub fn cooldown_remaining(&self, now: Instant, cooldown: Duration) -> Option<Duration> {
        let rebooted = self.last_reboot_at?;
        let elapsed = now.saturating_duration_since(rebooted);
        if elapsed < cooldown {
            Some(cooldown - elapsed)
        } else {
            None
        }
    }

    /// Gate a poll attempt. Enters Polling unless cooldown is active.
    pub fn begin_poll(&mut self, now: Instant, cooldown: Duration) -> PollGate {
        if let Some(remaining) = self.cooldown_remaining(now, cooldown) {
            self.phase = CameraPhase::CooldownSuppressed;
            return PollGate::Suppressed { remaining };
        }

        self.phase = CameraPhase::Polling;
        PollGate::Proceed
    }

    /// Successful sample. Returns the failure count that was cleared.
    pub fn record_success(&mut self, count: u32) -> u32 {
        let cleared = self.consecutive_failures;
        self.consecutive_failures = 0;
        self.last_success_at = Some(Utc::now());
        self.last_count = Some(count);
        self.phase = CameraPhase::Idle;
        cleared
    }

    /// Every attempt of this cycle failed transiently.
    ///
    /// Returns true when the failure count has just reached `threshold`
    /// (escalation). A threshold of 0 never escalates.
    pub fn record_exhausted(&mut self, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.phase = CameraPhase::Idle;
        threshold > 0 && self.consecutive_failures == threshold
    }

    /// Cycle abandoned without touching the failure count
    pub fn record_abandoned(&mut self) {
        self.phase = CameraPhase::Idle;
    }

    /// Leave a Polling phase nobody will finish. Returns whether it changed.
    pub fn settle(&mut self) -> bool {
        if self.phase == CameraPhase::Polling {
            self.phase = CameraPhase::Idle;
            true
        } else {
            false
        }
    }

    /// A reboot command was issued. The failure count is kept.
    pub fn mark_rebooted(&mut self, now: Instant) {
        self.last_reboot_at = Some(now);
        self.last_reboot_wall = Some(Utc::now());
        self.reboots += 1;
        self.phase = CameraPhase::CooldownSuppressed;
    }

    pub fn snapshot(&self, address: &str, now: Instant, cooldown: Duration) -> CameraStateSnapshot {
        CameraStateSnapshot {
            address: address.to_string(),
            phase: self.phase,
            consecutive_failures: self.consecutive_failures,
            reboots: self.reboots,
            last_reboot_at: self.last_reboot_wall,
            cooldown_remaining_sec: self
                .cooldown_remaining(now, cooldown)
                .map(|d| d.as_secs()),
            last_success_at: self.last_success_at,
            last_count: self.last_count,
        }
    }
}

/// Read-only view of a camera record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStateSnapshot {
    pub address: String,
    pub phase: CameraPhase,
    pub consecutive_failures: u32,
    pub reboots: u64,
    pub last_reboot_at: Option<DateTime<Utc>>,
    pub cooldown_remaining_sec: Option<u64>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_count: Option<u32>,
}

/// Keyed store of camera records, one lock per address
pub struct CameraStateStore {
    entries: RwLock<HashMap<String, Arc<Mutex<CameraState>>>>,
}

impl CameraStateStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record for `address`, created on first use
    pub async fn get_or_create(&self, address: &str) -> Arc<Mutex<CameraState>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(address) {
                return entry.clone();
            }
        }

        let mut entries = self.entries.write().await;
        entries
            .entry(address.to_string())
            .or_insert_with(|| {
                tracing::debug!(address = %address, "Camera state created");
                Arc::new(Mutex::new(CameraState::default()))
            })
            .clone()
    }

    pub async fn get(&self, address: &str) -> Option<Arc<Mutex<CameraState>>> {
        self.entries.read().await.get(address).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshots of every record, sorted by address
    pub async fn snapshots(&self, cooldown: Duration) -> Vec<CameraStateSnapshot> {
        let entries: Vec<(String, Arc<Mutex<CameraState>>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let now = Instant::now();
        let mut out = Vec::with_capacity(entries.len());
        for (address, entry) in entries {
            out.push(entry.lock().await.snapshot(&address, now, cooldown));
        }
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }
}

impl Default for CameraStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    #[test]
    fn test_success_resets_failures() {
        let mut state = CameraState::default();
        for _ in 0..7 {
            state.record_exhausted(20);
        }
        assert_eq!(state.consecutive_failures(), 7);

        assert_eq!(state.record_success(3), 7);
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.phase(), CameraPhase::Idle);
    }

    #[test]
    fn test_escalates_only_when_threshold_first_reached() {
        let mut state = CameraState::default();
        let escalations: Vec<bool> = (0..25).map(|_| state.record_exhausted(20)).collect();

        assert_eq!(escalations.iter().filter(|e| **e).count(), 1);
        assert!(escalations[19]);
        assert_eq!(state.consecutive_failures(), 25);
    }

    #[test]
    fn test_escalates_again_after_reset() {
        let mut state = CameraState::default();
        for _ in 0..2 {
            state.record_exhausted(3);
        }
        assert!(state.record_exhausted(3));
        state.record_success(0);

        assert!(!state.record_exhausted(3));
        assert!(!state.record_exhausted(3));
        assert!(state.record_exhausted(3));
    }

    #[test]
    fn test_zero_threshold_never_escalates() {
        let mut state = CameraState::default();
        assert!((0..50).all(|_| !state.record_exhausted(0)));
    }

    #[test]
    fn test_abandon_keeps_failures() {
        let mut state = CameraState::default();
        state.record_exhausted(20);
        state.begin_poll(Instant::now(), COOLDOWN);
        state.record_abandoned();

        assert_eq!(state.consecutive_failures(), 1);
        assert_eq!(state.phase(), CameraPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_gate() {
        let mut state = CameraState::default();
        assert_eq!(state.begin_poll(Instant::now(), COOLDOWN), PollGate::Proceed);

        state.mark_rebooted(Instant::now());
        assert_eq!(state.phase(), CameraPhase::CooldownSuppressed);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(
            state.begin_poll(Instant::now(), COOLDOWN),
            PollGate::Suppressed {
                remaining: Duration::from_secs(1)
            }
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(state.begin_poll(Instant::now(), COOLDOWN), PollGate::Proceed);
        assert_eq!(state.phase(), CameraPhase::Polling);
    }

    #[test]
    fn test_settle_only_clears_polling() {
        let mut state = CameraState::default();
        assert!(!state.settle());

        state.begin_poll(Instant::now(), COOLDOWN);
        assert!(state.settle());
        assert_eq!(state.phase(), CameraPhase::Idle);

        state.mark_rebooted(Instant::now());
        assert!(!state.settle());
        assert_eq!(state.phase(), CameraPhase::CooldownSuppressed);
    }

    #[test]
    fn test_reboot_keeps_failure_count() {
        let mut state = CameraState::default();
        for _ in 0..20 {
            state.record_exhausted(20);
        }
        let now = Instant::now();
        state.mark_rebooted(now);

        assert_eq!(state.consecutive_failures(), 20);
        assert_eq!(state.reboots(), 1);
        assert_eq!(state.last_reboot_at(), Some(now));
    }

    #[tokio::test]
    async fn test_store_creates_lazily_and_shares_records() {
        let store = CameraStateStore::new();
        assert!(store.is_empty().await);
        assert!(store.get("http://cam-a").await.is_none());

        let a1 = store.get_or_create("http://cam-a").await;
        a1.lock().await.record_exhausted(20);

        let a2 = store.get_or_create("http://cam-a").await;
        assert_eq!(a2.lock().await.consecutive_failures(), 1);

        store.get_or_create("http://cam-b").await;
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_snapshots_sorted() {
        let store = CameraStateStore::new();
        store.get_or_create("http://cam-b").await;
        store
            .get_or_create("http://cam-a")
            .await
            .lock()
            .await
            .record_success(4);

        let snaps = store.snapshots(COOLDOWN).await;
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].address, "http://cam-a");
        assert_eq!(snaps[0].last_count, Some(4));
        assert_eq!(snaps[1].cooldown_remaining_sec, None);
    }
}
