//! The published snapshot reference.
//!
//! Readers pin an `Arc<RegistrySnapshot>` with a wait-free load and keep
//! serving from it even if a newer snapshot is published mid-request. The
//! reload pipeline is the only writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::snapshot::RegistrySnapshot;

#[derive(Debug)]
pub struct ActiveRegistry {
    current: ArcSwap<RegistrySnapshot>,
    swaps: AtomicU64,
}

impl Default for ActiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveRegistry {
    /// Start with an empty snapshot (version 0).
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            swaps: AtomicU64::new(0),
        }
    }

    /// Pin the current snapshot.
    pub fn load(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Publish `snapshot`, returning the one it replaced.
    pub fn swap(&self, snapshot: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        let previous = self.current.swap(Arc::new(snapshot));
        self.swaps.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            previous_version = previous.version(),
            version = self.current.load().version(),
            "registry snapshot published"
        );
        previous
    }

    /// How many snapshots have been published since startup.
    pub fn swap_count(&self) -> u64 {
        self.swaps.load(Ordering::SeqCst)
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }
}
