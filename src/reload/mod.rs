//! # Reload
//!
//! Hot reload of the endpoint catalog. A trigger (startup, `POST /reload`,
//! or the scheduler) runs the whole pipeline under a single-flight guard;
//! concurrent triggers are dropped, not queued.

pub mod guard;
pub mod service;
pub mod status;

pub use guard::{FlightPermit, SingleFlightGuard};
pub use service::{CycleError, ReloadService, TriggerOutcome};
pub use status::{CycleReport, Phase, ReloadCounters, StatusTracker, StatusView, TriggerOrigin};
