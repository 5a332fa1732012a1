//! # Registry
//!
//! The request-path view of the catalog: an immutable [`RegistrySnapshot`]
//! built once per reload cycle, published atomically through
//! [`ActiveRegistry`], and served by the [`Dispatcher`].

pub mod active;
pub mod dispatch;
pub mod snapshot;

pub use active::ActiveRegistry;
pub use dispatch::{DispatchError, DispatchRequest, Dispatcher};
pub use snapshot::{build_snapshot, RecordProjection, RegistrySnapshot, RouteEntry, SnapshotBuildError};
