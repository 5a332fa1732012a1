//! # Catalog
//!
//! Persistent endpoint catalog: one SQLite row per `(path, method)`.
//!
//! The [`Reconciler`] owns the sync of declared endpoints into the catalog;
//! the admin operations on [`SqliteCatalog`] mutate rows out of band.

pub mod error;
pub mod reconcile;
pub mod record;
pub mod store;

pub use error::CatalogError;
pub use reconcile::{
    ReconcilePolicy, ReconcileReport, ReconcileStats, Reconciled, Reconciler, TierSyncPolicy,
};
pub use record::{
    AccessTier, CallerPlan, EndpointPatch, EndpointRecord, NewRecord, RecordFilter, UnknownTier,
};
pub use store::SqliteCatalog;
