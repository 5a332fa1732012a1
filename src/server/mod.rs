//! HTTP server for the endpoint hub.
//!
//! Exposes reload control, the catalog (full pull, version polling and a
//! live event stream) and dispatch to the published capabilities.
//!
//! # Endpoints
//!
//! - `GET  /health`          - Liveness probe
//! - `POST /reload`          - Manual reload
//! - `GET  /reload/status`   - Reload status
//! - `GET  /catalog`         - Catalog listing
//! - `GET  /catalog/version` - Version counter and digest
//! - `GET  /catalog/events`  - Server-sent events
//! - `ANY  /api/*path`       - Capability dispatch

pub mod routes;

pub use routes::{app_router, AppState};
