//! The hub: one context object owning the catalog, the published registry,
//! the dependent caches, the change notifier and the reload service.
//!
//! Admin edits go through the hub so that each one is followed by the
//! matching targeted [`ChangeEvent`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capabilities::{HandlerResponse, MetadataDiscovery, ModuleSet};
use crate::catalog::{
    AccessTier, CatalogError, EndpointPatch, EndpointRecord, NewRecord, RecordFilter, Reconciler,
    SqliteCatalog,
};
use crate::config::HubConfig;
use crate::notify::{
    AccessTierCache, ChangeEvent, ChangeNotifier, RateLimitCache, Subscription,
};
use crate::registry::{ActiveRegistry, DispatchError, DispatchRequest, Dispatcher};
use crate::reload::{ReloadService, StatusView, TriggerOrigin, TriggerOutcome};

/// What polling consumers compare to detect catalog drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogVersion {
    pub version: u64,
    pub active_count: usize,
    pub digest: String,
}

pub struct EndpointHub {
    config: HubConfig,
    catalog: SqliteCatalog,
    registry: Arc<ActiveRegistry>,
    notifier: Arc<ChangeNotifier>,
    reload: ReloadService,
    dispatcher: Dispatcher,
}

impl EndpointHub {
    /// Wire a hub from `config`, serving every module linked into the binary.
    pub fn from_config(config: HubConfig) -> Result<Self, CatalogError> {
        Self::new(config, ModuleSet::linked())
    }

    pub fn new(config: HubConfig, modules: ModuleSet) -> Result<Self, CatalogError> {
        let catalog = SqliteCatalog::open(&config.database_path)?;

        let registry = Arc::new(ActiveRegistry::new());
        let tiers = Arc::new(AccessTierCache::new());
        let limits = Arc::new(RateLimitCache::new(config.rate_limits));
        let notifier = Arc::new(
            ChangeNotifier::new(catalog.clone(), config.subscriber_buffer)
                .with_cache(tiers.clone())
                .with_cache(limits.clone()),
        );

        let mut discovery = MetadataDiscovery::new(modules);
        for dir in &config.manifest_dirs {
            discovery.add_manifest_dir(dir);
        }

        let reload = ReloadService::new(
            discovery,
            Reconciler::new(catalog.clone(), config.reconcile_policy()),
            Arc::clone(&registry),
            Arc::clone(&notifier),
            config.status_history,
        );
        let dispatcher = Dispatcher::new(Arc::clone(&registry), tiers, limits);

        Ok(Self {
            config,
            catalog,
            registry,
            notifier,
            reload,
            dispatcher,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SqliteCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<ActiveRegistry> {
        &self.registry
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    // -----------------------------------------------------------------------
    // Reload and dispatch
    // -----------------------------------------------------------------------

    pub async fn trigger(&self, origin: TriggerOrigin) -> TriggerOutcome {
        self.reload.trigger(origin).await
    }

    pub fn status(&self) -> StatusView {
        self.reload.status()
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<HandlerResponse, DispatchError> {
        self.dispatcher.dispatch(request).await
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    // -----------------------------------------------------------------------
    // Catalog reads
    // -----------------------------------------------------------------------

    pub async fn list(&self, filter: RecordFilter) -> Result<Vec<EndpointRecord>, CatalogError> {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || catalog.list(&filter)).await?
    }

    pub async fn catalog_version(&self) -> Result<CatalogVersion, CatalogError> {
        let catalog = self.catalog.clone();
        let version = self.notifier.version();
        tokio::task::spawn_blocking(move || {
            Ok(CatalogVersion {
                version,
                active_count: catalog.count_active()?,
                digest: catalog.digest()?,
            })
        })
        .await?
    }

    // -----------------------------------------------------------------------
    // Admin edits
    // -----------------------------------------------------------------------

    /// Create an endpoint by hand. It becomes reachable only if a compiled
    /// module declares the same `(path, method)` on the next reload.
    pub async fn create_endpoint(&self, record: NewRecord) -> Result<EndpointRecord, CatalogError> {
        self.edit(move |catalog| {
            let created = catalog.insert_raw(&record)?;
            Ok((created.clone(), Some(ChangeEvent::created(created))))
        })
        .await
    }

    pub async fn update_endpoint(
        &self,
        id: i64,
        patch: EndpointPatch,
    ) -> Result<Option<EndpointRecord>, CatalogError> {
        self.edit(move |catalog| {
            let updated = catalog.update_details(id, &patch)?;
            let event = updated.clone().map(ChangeEvent::updated);
            Ok((updated, event))
        })
        .await
    }

    pub async fn set_access_tier(
        &self,
        id: i64,
        tier: AccessTier,
    ) -> Result<Option<EndpointRecord>, CatalogError> {
        self.edit(move |catalog| {
            Ok(match catalog.set_access_tier(id, tier)? {
                Some((record, previous)) => (
                    Some(record.clone()),
                    Some(ChangeEvent::status_changed(record, previous)),
                ),
                None => (None, None),
            })
        })
        .await
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<Option<EndpointRecord>, CatalogError> {
        self.edit(move |catalog| {
            let toggled = catalog.set_active(id, active)?;
            let event = toggled.clone().map(ChangeEvent::active_toggled);
            Ok((toggled, event))
        })
        .await
    }

    pub async fn bulk_set_access_tier(&self, ids: Vec<i64>, tier: AccessTier) -> Result<usize, CatalogError> {
        self.edit(move |catalog| {
            let count = catalog.bulk_set_access_tier(&ids, tier)?;
            Ok((count, Some(ChangeEvent::bulk_changed(count))))
        })
        .await
    }

    pub async fn delete_endpoint(&self, id: i64) -> Result<Option<EndpointRecord>, CatalogError> {
        self.edit(move |catalog| {
            let deleted = catalog.delete(id)?;
            let event = deleted.clone().map(ChangeEvent::deleted);
            Ok((deleted, event))
        })
        .await
    }

    /// Run a catalog edit on the blocking pool and notify its event, if any.
    async fn edit<F, R>(&self, f: F) -> Result<R, CatalogError>
    where
        F: FnOnce(&SqliteCatalog) -> Result<(R, Option<ChangeEvent>), CatalogError> + Send + 'static,
        R: Send + 'static,
    {
        let catalog = self.catalog.clone();
        let notifier = Arc::clone(&self.notifier);
        tokio::task::spawn_blocking(move || {
            let (result, event) = f(&catalog)?;
            if let Some(event) = event {
                notifier.notify(event);
            }
            Ok(result)
        })
        .await?
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    /// Trigger a scheduled reload every `reload_interval_secs` until
    /// `shutdown` turns `true`. `None` when scheduling is disabled.
    pub fn spawn_scheduler(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let interval = self.config.reload_interval()?;
        let hub = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; startup already reloaded.
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let TriggerOutcome::Failed(report) = hub.trigger(TriggerOrigin::Scheduled).await {
                            tracing::warn!(
                                error = report.error.as_deref().unwrap_or("unknown"),
                                "scheduled reload failed"
                            );
                        }
                    }
                }
            }
            tracing::debug!("reload scheduler stopped");
        }))
    }

    /// Ping live subscribers every `ping_interval_secs`. `None` when disabled.
    pub fn spawn_liveness_pings(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let interval = self.config.ping_interval()?;
        let hub = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let delivery = hub.notifier.ping();
                        if delivery.detached > 0 {
                            tracing::info!(detached = delivery.detached, "detached dead live subscribers");
                        }
                    }
                }
            }
        }))
    }
}
