//! Change fan-out: dependent caches, live subscribers, version counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::caches::DependentCache;
use super::event::{ChangeEvent, ChangeKind, LiveMessage};
use super::subscribers::{Delivery, SubscriberRegistry, Subscription};
use crate::catalog::{RecordFilter, SqliteCatalog};

/// What one notification reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyReport {
    pub delivered: usize,
    pub detached: usize,
    /// Counter value after this notification.
    pub version: u64,
}

/// Propagates catalog changes to everything derived from the catalog.
///
/// `notify` may read the catalog for bulk and sync events, so async callers
/// run it on the blocking pool.
pub struct ChangeNotifier {
    catalog: SqliteCatalog,
    caches: Vec<Arc<dyn DependentCache>>,
    subscribers: SubscriberRegistry,
    version: AtomicU64,
}

impl ChangeNotifier {
    pub fn new(catalog: SqliteCatalog, subscriber_buffer: usize) -> Self {
        Self {
            catalog,
            caches: Vec::new(),
            subscribers: SubscriberRegistry::new(subscriber_buffer),
            version: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn DependentCache>) -> Self {
        self.caches.push(cache);
        self
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }

    pub fn unsubscribe(&self, id: &uuid::Uuid) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Refresh caches, broadcast, bump the version.
    pub fn notify(&self, event: ChangeEvent) -> NotifyReport {
        self.refresh_caches(&event);

        let delivery = self.subscribers.broadcast(&LiveMessage::Change(event.clone()));
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::debug!(
            event_type = event.event_type(),
            event_id = %event.id,
            delivered = delivery.delivered,
            detached = delivery.detached,
            version,
            "change notified"
        );

        NotifyReport {
            delivered: delivery.delivered,
            detached: delivery.detached,
            version,
        }
    }

    /// Send a liveness ping. Also how dead subscribers get noticed between
    /// changes.
    pub fn ping(&self) -> Delivery {
        self.subscribers.broadcast(&LiveMessage::ping())
    }

    fn refresh_caches(&self, event: &ChangeEvent) {
        if self.caches.is_empty() {
            return;
        }

        match &event.kind {
            ChangeKind::Deleted { record } => {
                for cache in &self.caches {
                    cache.invalidate(&record.path, &record.method);
                }
            }
            ChangeKind::BulkChanged { .. } | ChangeKind::SyncCompleted { .. } => {
                match self.catalog.list(&RecordFilter::default()) {
                    Ok(records) => {
                        for cache in &self.caches {
                            cache.refresh(&records);
                        }
                    }
                    Err(e) => {
                        log::warn!("Could not refresh dependent caches, clearing them: {}", e);
                        for cache in &self.caches {
                            cache.clear();
                        }
                    }
                }
            }
            _ => {
                if let Some(record) = event.record() {
                    for cache in &self.caches {
                        cache.apply(record);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AccessTier, NewRecord};
    use crate::notify::caches::test_support::record;
    use crate::notify::caches::AccessTierCache;

    fn setup() -> (tempfile::TempDir, SqliteCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SqliteCatalog::open(dir.path().join("catalog.db")).unwrap();
        (dir, catalog)
    }

    #[tokio::test]
    async fn test_one_broken_subscriber_does_not_block_the_rest() {
        let (_dir, catalog) = setup();
        let notifier = ChangeNotifier::new(catalog, 8);

        let mut subs: Vec<Subscription> = (0..50).map(|_| notifier.subscribe()).collect();
        let broken = subs.remove(17);
        drop(broken.receiver);

        let report = notifier.notify(ChangeEvent::updated(record("/x", "GET", AccessTier::Free, true)));
        assert_eq!(report.delivered, 49);
        assert_eq!(report.detached, 1);
        assert_eq!(notifier.subscriber_count(), 49);

        for sub in &mut subs {
            match sub.receiver.recv().await.unwrap() {
                LiveMessage::Change(event) => assert_eq!(event.record().unwrap().path, "/x"),
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[test]
    fn test_version_bumps_on_every_notify() {
        let (_dir, catalog) = setup();
        let notifier = ChangeNotifier::new(catalog, 8);
        assert_eq!(notifier.version(), 0);
        assert_eq!(notifier.notify(ChangeEvent::bulk_changed(0)).version, 1);
        assert_eq!(notifier.notify(ChangeEvent::bulk_changed(0)).version, 2);
        assert_eq!(notifier.version(), 2);
    }

    #[test]
    fn test_single_events_push_and_bulk_events_pull() {
        let (_dir, catalog) = setup();
        let cache = Arc::new(AccessTierCache::new());
        let notifier = ChangeNotifier::new(catalog.clone(), 8).with_cache(cache.clone());

        // Pushed straight from the event, without touching the catalog.
        notifier.notify(ChangeEvent::status_changed(
            record("/pushed", "GET", AccessTier::Vip, true),
            AccessTier::Free,
        ));
        assert_eq!(cache.get("/pushed", "GET").unwrap().tier, AccessTier::Vip);

        // Pulled from the catalog, which replaces the pushed entry.
        catalog
            .insert_raw(&NewRecord::new("/stored", "GET", "Stored").with_access_tier(AccessTier::Premium))
            .unwrap();
        notifier.notify(ChangeEvent::bulk_changed(1));
        assert!(cache.get("/pushed", "GET").is_none());
        assert_eq!(cache.get("/stored", "GET").unwrap().tier, AccessTier::Premium);

        notifier.notify(ChangeEvent::deleted(record("/stored", "GET", AccessTier::Premium, true)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unreadable_catalog_clears_caches() {
        let (dir, catalog) = setup();
        let cache = Arc::new(AccessTierCache::new());
        let notifier = ChangeNotifier::new(catalog, 8).with_cache(cache.clone());
        notifier.notify(ChangeEvent::created(record("/a", "GET", AccessTier::Vip, true)));
        assert_eq!(cache.len(), 1);

        drop(dir);
        let report = notifier.notify(ChangeEvent::bulk_changed(3));
        assert_eq!(report.version, 2);
        assert!(cache.is_empty());
    }
}
