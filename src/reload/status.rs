//! Reload status: current phase, counters and recent cycle history.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ReconcileStats;

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    Startup,
    Manual,
    Scheduled,
}

impl fmt::Display for TriggerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerOrigin::Startup => f.write_str("startup"),
            TriggerOrigin::Manual => f.write_str("manual"),
            TriggerOrigin::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// Pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Discovering,
    Normalizing,
    Reconciling,
    BuildingSnapshot,
    Swapping,
    Notifying,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadCounters {
    pub total_reloads: u64,
    pub successful_reloads: u64,
    pub failed_reloads: u64,
    /// Triggers turned away because a cycle was already running.
    pub skipped_reloads: u64,
    pub last_duration_ms: u64,
}

/// One finished cycle, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub id: Uuid,
    pub origin: TriggerOrigin,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    /// All zero when the cycle failed.
    pub stats: ReconcileStats,
    /// Modules that could not be loaded this pass.
    pub failed_modules: Vec<String>,
    pub total_endpoints: usize,
    /// Version of the snapshot published by this cycle.
    pub snapshot_version: Option<u64>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Operator view returned by [`StatusTracker::view`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub phase: Phase,
    pub is_running: bool,
    pub total_endpoints: usize,
    pub last_reload_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub stats: ReloadCounters,
    /// Newest first.
    pub history: Vec<CycleReport>,
}

#[derive(Debug, Default)]
struct State {
    phase: Phase,
    is_running: bool,
    total_endpoints: usize,
    last_reload_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
    counters: ReloadCounters,
    history: VecDeque<CycleReport>,
}

#[derive(Debug)]
pub struct StatusTracker {
    state: RwLock<State>,
    history_limit: usize,
}

impl StatusTracker {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            history_limit: history_limit.max(1),
        }
    }

    pub fn begin(&self) {
        let mut state = self.state.write();
        state.is_running = true;
        state.phase = Phase::Discovering;
    }

    pub fn set_phase(&self, phase: Phase) {
        self.state.write().phase = phase;
    }

    pub fn record_skip(&self) {
        self.state.write().counters.skipped_reloads += 1;
    }

    /// Close the running cycle and return to `Idle`.
    pub fn finish(&self, report: CycleReport) {
        let mut state = self.state.write();
        state.phase = Phase::Idle;
        state.is_running = false;
        state.counters.total_reloads += 1;
        state.counters.last_duration_ms = report.duration_ms;

        if report.success {
            state.counters.successful_reloads += 1;
            state.total_endpoints = report.total_endpoints;
            state.last_reload_time = Some(report.finished_at);
            state.last_error = None;
        } else {
            state.counters.failed_reloads += 1;
            state.last_error = report.error.clone();
        }

        state.history.push_front(report);
        state.history.truncate(self.history_limit);
    }

    pub fn phase(&self) -> Phase {
        self.state.read().phase
    }

    pub fn counters(&self) -> ReloadCounters {
        self.state.read().counters
    }

    pub fn view(&self) -> StatusView {
        let state = self.state.read();
        StatusView {
            phase: state.phase,
            is_running: state.is_running,
            total_endpoints: state.total_endpoints,
            last_reload_time: state.last_reload_time,
            last_error: state.last_error.clone(),
            stats: state.counters,
            history: state.history.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(success: bool, endpoints: usize) -> CycleReport {
        let now = Utc::now();
        CycleReport {
            id: Uuid::new_v4(),
            origin: TriggerOrigin::Manual,
            started_at: now,
            finished_at: now,
            success,
            stats: ReconcileStats::default(),
            failed_modules: vec![],
            total_endpoints: endpoints,
            snapshot_version: success.then_some(1),
            duration_ms: 4,
            error: (!success).then(|| "catalog unavailable".to_string()),
        }
    }

    #[test]
    fn test_counters_and_last_error() {
        let tracker = StatusTracker::new(10);
        tracker.begin();
        assert!(tracker.view().is_running);
        tracker.set_phase(Phase::Reconciling);
        assert_eq!(tracker.phase(), Phase::Reconciling);

        tracker.finish(report(true, 5));
        tracker.begin();
        tracker.finish(report(false, 0));
        tracker.record_skip();

        let view = tracker.view();
        assert_eq!(view.phase, Phase::Idle);
        assert!(!view.is_running);
        assert_eq!(view.total_endpoints, 5);
        assert_eq!(view.last_error.as_deref(), Some("catalog unavailable"));
        assert_eq!(view.stats.total_reloads, 2);
        assert_eq!(view.stats.successful_reloads, 1);
        assert_eq!(view.stats.failed_reloads, 1);
        assert_eq!(view.stats.skipped_reloads, 1);
        assert!(!view.history[0].success);
    }

    #[test]
    fn test_history_is_bounded() {
        let tracker = StatusTracker::new(3);
        for _ in 0..5 {
            tracker.begin();
            tracker.finish(report(true, 1));
        }
        assert_eq!(tracker.view().history.len(), 3);
    }

    #[test]
    fn test_status_view_json_shape() {
        let tracker = StatusTracker::new(3);
        let json = serde_json::to_value(tracker.view()).unwrap();
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["isRunning"], false);
        assert!(json["stats"]["totalReloads"].is_number());
        assert!(json["lastReloadTime"].is_null());
    }
}
