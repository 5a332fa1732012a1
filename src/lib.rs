//! # endpoint-hub
//!
//! Hot-reloading endpoint catalog for a service that exposes a large,
//! changing set of compiled capabilities behind free/VIP/premium access tiers.
//!
//! A reload cycle discovers capability descriptors from every source module,
//! normalizes them to one HTTP verb each, reconciles them into the SQLite
//! catalog inside a single transaction, builds an immutable dispatch snapshot
//! and publishes it atomically. Dependent caches and live subscribers are
//! notified afterwards. Request dispatch never blocks on a reload and never
//! observes a half-built snapshot.

pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod hub;
pub mod live;
pub mod notify;
pub mod registry;
pub mod reload;
pub mod server;

pub use capabilities::{CapabilityDescriptor, CapabilityModule, MetadataDiscovery, ModuleSet};
pub use catalog::{AccessTier, EndpointRecord, Reconciler, SqliteCatalog};
pub use config::HubConfig;
pub use hub::{CatalogVersion, EndpointHub};
pub use notify::{ChangeEvent, ChangeNotifier};
pub use registry::{ActiveRegistry, Dispatcher, RegistrySnapshot};
pub use reload::{ReloadService, TriggerOrigin, TriggerOutcome};

/// Crate version reported by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
