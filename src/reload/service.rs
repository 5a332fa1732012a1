//! The reload pipeline.
//!
//! discover -> normalize -> reconcile (one transaction) -> build snapshot ->
//! swap -> notify, as one guarded unit. The swap only happens after the
//! transaction committed and the snapshot built; any earlier failure leaves
//! the published snapshot untouched.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use super::guard::SingleFlightGuard;
use super::status::{CycleReport, Phase, StatusTracker, StatusView, TriggerOrigin};
use crate::capabilities::{normalize, MetadataDiscovery};
use crate::catalog::{CatalogError, ReconcileStats, Reconciler};
use crate::notify::{ChangeEvent, ChangeNotifier, NotifyReport};
use crate::registry::{build_snapshot, ActiveRegistry, SnapshotBuildError};

/// Why a cycle aborted.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("reconciliation failed: {0}")]
    Transaction(#[from] CatalogError),

    #[error("snapshot build failed: {0}")]
    SnapshotBuild(#[from] SnapshotBuildError),

    #[error("reload task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CycleError {
    fn from(e: tokio::task::JoinError) -> Self {
        CycleError::Task(e.to_string())
    }
}

/// Result of [`ReloadService::trigger`].
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    /// Another cycle was running; nothing was done.
    Skipped,
    Completed(CycleReport),
    Failed(CycleReport),
}

impl TriggerOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            TriggerOutcome::Skipped => None,
            TriggerOutcome::Completed(report) | TriggerOutcome::Failed(report) => Some(report),
        }
    }
}

struct CycleSuccess {
    stats: ReconcileStats,
    failed_modules: Vec<String>,
    total_endpoints: usize,
    snapshot_version: u64,
}

/// Runs reload cycles, one at a time.
///
/// Each cycle runs on its own task. Dropping the future returned by
/// [`ReloadService::trigger`] stops waiting for the result; the cycle itself
/// still runs to the end and records its report.
pub struct ReloadService {
    pipeline: Arc<Pipeline>,
}

struct Pipeline {
    discovery: MetadataDiscovery,
    reconciler: Reconciler,
    registry: Arc<ActiveRegistry>,
    notifier: Arc<ChangeNotifier>,
    guard: SingleFlightGuard,
    status: StatusTracker,
}

impl ReloadService {
    pub fn new(
        discovery: MetadataDiscovery,
        reconciler: Reconciler,
        registry: Arc<ActiveRegistry>,
        notifier: Arc<ChangeNotifier>,
        history_limit: usize,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                discovery,
                reconciler,
                registry,
                notifier,
                guard: SingleFlightGuard::new(),
                status: StatusTracker::new(history_limit),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.guard.is_running()
    }

    pub fn status(&self) -> StatusView {
        self.pipeline.status.view()
    }

    pub fn registry(&self) -> &Arc<ActiveRegistry> {
        &self.pipeline.registry
    }

    /// Run one cycle unless one is already in flight.
    pub async fn trigger(&self, origin: TriggerOrigin) -> TriggerOutcome {
        let pipeline = Arc::clone(&self.pipeline);
        match tokio::spawn(async move { pipeline.run_guarded(origin).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(%origin, error = %e, "reload task aborted");
                let now = Utc::now();
                let report = CycleReport {
                    id: Uuid::new_v4(),
                    origin,
                    started_at: now,
                    finished_at: now,
                    success: false,
                    stats: ReconcileStats::default(),
                    failed_modules: Vec::new(),
                    total_endpoints: self.pipeline.registry.load().len(),
                    snapshot_version: None,
                    duration_ms: 0,
                    error: Some(CycleError::from(e).to_string()),
                };
                self.pipeline.status.finish(report.clone());
                TriggerOutcome::Failed(report)
            }
        }
    }
}

impl Pipeline {
    async fn run_guarded(&self, origin: TriggerOrigin) -> TriggerOutcome {
        let Some(_permit) = self.guard.try_acquire() else {
            tracing::info!(%origin, "reload already running, trigger skipped");
            self.status.record_skip();
            return TriggerOutcome::Skipped;
        };

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        self.status.begin();

        let span = tracing::info_span!("reload", cycle_id = %id, %origin);
        let result = self.run_cycle().instrument(span).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let finished_at = Utc::now();

        match result {
            Ok(success) => {
                let report = CycleReport {
                    id,
                    origin,
                    started_at,
                    finished_at,
                    success: true,
                    stats: success.stats,
                    failed_modules: success.failed_modules,
                    total_endpoints: success.total_endpoints,
                    snapshot_version: Some(success.snapshot_version),
                    duration_ms,
                    error: None,
                };
                tracing::info!(
                    cycle_id = %id,
                    %origin,
                    created = report.stats.created,
                    updated = report.stats.updated,
                    deactivated = report.stats.deactivated,
                    purged = report.stats.purged,
                    skipped = report.stats.skipped,
                    endpoints = report.total_endpoints,
                    duration_ms,
                    "reload completed"
                );
                self.status.finish(report.clone());
                TriggerOutcome::Completed(report)
            }
            Err(e) => {
                tracing::error!(cycle_id = %id, %origin, error = %e, duration_ms, "reload failed");
                let report = CycleReport {
                    id,
                    origin,
                    started_at,
                    finished_at,
                    success: false,
                    stats: ReconcileStats::default(),
                    failed_modules: Vec::new(),
                    total_endpoints: self.registry.load().len(),
                    snapshot_version: None,
                    duration_ms,
                    error: Some(e.to_string()),
                };
                self.status.finish(report.clone());
                TriggerOutcome::Failed(report)
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleSuccess, CycleError> {
        self.status.set_phase(Phase::Discovering);
        let discovery = self.discovery.clone();
        let discovered = tokio::task::spawn_blocking(move || discovery.discover()).await?;
        let failed_modules: Vec<String> = discovered.failures.iter().map(|f| f.to_string()).collect();

        self.status.set_phase(Phase::Normalizing);
        let normalized = normalize(discovered.descriptors);
        tracing::debug!(
            descriptors = normalized.descriptors.len(),
            invalid = normalized.skipped.len(),
            "descriptors normalized"
        );

        self.status.set_phase(Phase::Reconciling);
        let reconciler = self.reconciler.clone();
        let descriptors = normalized.descriptors;
        let (descriptors, reconciled) = tokio::task::spawn_blocking(move || {
            let reconciled = reconciler.reconcile(&descriptors);
            (descriptors, reconciled)
        })
        .await?;
        let reconciled = reconciled?;

        self.status.set_phase(Phase::BuildingSnapshot);
        let version = self.registry.version() + 1;
        let snapshot = build_snapshot(
            &descriptors,
            &reconciled.records,
            &self.discovery.modules().handlers(),
            version,
        )?;
        let total_endpoints = snapshot.len();

        self.status.set_phase(Phase::Swapping);
        self.registry.swap(snapshot);

        self.status.set_phase(Phase::Notifying);
        let mut stats = reconciled.stats;
        stats.skipped += normalized.skipped.len();
        let notifier = Arc::clone(&self.notifier);
        let event = ChangeEvent::sync_completed(stats, total_endpoints);
        let notified = tokio::task::spawn_blocking(move || notifier.notify(event))
            .await
            .unwrap_or_else(|e| {
                // The snapshot is already live; a lost notification does not
                // undo the cycle.
                tracing::error!(error = %e, "sync notification task failed");
                NotifyReport::default()
            });
        tracing::debug!(delivered = notified.delivered, version = notified.version, "sync notified");

        Ok(CycleSuccess {
            stats,
            failed_modules,
            total_endpoints,
            snapshot_version: version,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use parking_lot::Mutex;

    use super::*;
    use crate::capabilities::module::test_support::{BrokenModule, StaticModule, TagHandler};
    use crate::capabilities::{
        CapabilityDescriptor, CapabilityModule, DescribeError, EndpointHandler, ModuleSet,
    };
    use crate::catalog::{ReconcilePolicy, SqliteCatalog};
    use crate::notify::{ChangeKind, LiveMessage};

    fn service_with(modules: ModuleSet) -> (tempfile::TempDir, SqliteCatalog, Arc<ReloadService>) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SqliteCatalog::open(dir.path().join("catalog.db")).unwrap();
        let notifier = Arc::new(ChangeNotifier::new(catalog.clone(), 16));
        let service = ReloadService::new(
            MetadataDiscovery::new(modules),
            Reconciler::new(catalog.clone(), ReconcilePolicy::default()),
            Arc::new(ActiveRegistry::new()),
            notifier,
            10,
        );
        (dir, catalog, Arc::new(service))
    }

    fn tools_module() -> Arc<StaticModule> {
        StaticModule::new("tools", vec![
            CapabilityDescriptor::new("/x", "GET, POST", "X"),
            CapabilityDescriptor::new("/y", "GET", "Y"),
        ])
    }

    #[tokio::test]
    async fn test_cycle_publishes_snapshot_and_notifies() {
        let (_dir, catalog, service) = service_with(ModuleSet::new().with(tools_module()));
        let mut sub = service.pipeline.notifier.subscribe();

        let outcome = service.trigger(TriggerOrigin::Startup).await;
        let report = match outcome {
            TriggerOutcome::Completed(report) => report,
            other => panic!("unexpected outcome: {:?}", other),
        };

        assert_eq!(report.stats.created, 3);
        assert_eq!(report.total_endpoints, 3);
        assert_eq!(report.snapshot_version, Some(1));
        assert_eq!(catalog.count_active().unwrap(), 3);

        let snapshot = service.registry().load();
        assert!(snapshot.resolve("/x", "POST").is_some());
        assert_eq!(service.pipeline.notifier.version(), 1);

        match sub.receiver.recv().await.unwrap() {
            LiveMessage::Change(event) => {
                assert!(matches!(event.kind, ChangeKind::SyncCompleted { total_endpoints: 3, .. }))
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let status = service.status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.total_endpoints, 3);
        assert_eq!(status.stats.successful_reloads, 1);
    }

    #[tokio::test]
    async fn test_broken_module_is_reported_not_fatal() {
        let modules = ModuleSet::new()
            .with(tools_module())
            .with(Arc::new(BrokenModule("broken")));
        let (_dir, _catalog, service) = service_with(modules);

        let outcome = service.trigger(TriggerOrigin::Manual).await;
        let report = outcome.report().unwrap();
        assert!(report.success);
        assert_eq!(report.failed_modules.len(), 1);
        assert!(report.failed_modules[0].contains("broken"));
        assert_eq!(report.total_endpoints, 3);
    }

    #[tokio::test]
    async fn test_invalid_descriptors_count_as_skipped() {
        let module = StaticModule::new("tools", vec![
            CapabilityDescriptor::new("/ok", "GET", "Ok"),
            CapabilityDescriptor::new("/bad", "FETCH", "Bad"),
        ]);
        let (_dir, _catalog, service) = service_with(ModuleSet::new().with(module));

        let report = service.trigger(TriggerOrigin::Manual).await.report().cloned().unwrap();
        assert_eq!(report.stats.created, 1);
        assert_eq!(report.stats.skipped, 1);
    }

    /// Blocks inside discovery until released.
    struct GatedModule {
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
        calls: AtomicUsize,
    }

    impl CapabilityModule for GatedModule {
        fn id(&self) -> &str {
            "gated"
        }

        fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, DescribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(entered) = self.entered.lock().take() {
                let _ = entered.send(());
                let _ = self.release.lock().recv();
            }
            Ok(vec![CapabilityDescriptor::new("/gated", "GET", "Gated")])
        }

        fn handler(&self) -> Arc<dyn EndpointHandler> {
            Arc::new(TagHandler("gated".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_trigger_is_skipped() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = Arc::new(GatedModule {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
            calls: AtomicUsize::new(0),
        });
        let (_dir, _catalog, service) = service_with(ModuleSet::new().with(gated.clone()));

        let first = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.trigger(TriggerOrigin::Manual).await }
        });
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(service.is_running());
        let second = service.trigger(TriggerOrigin::Scheduled).await;
        assert!(matches!(second, TriggerOutcome::Skipped));

        release_tx.send(()).unwrap();
        assert!(matches!(first.await.unwrap(), TriggerOutcome::Completed(_)));

        assert_eq!(gated.calls.load(Ordering::SeqCst), 1);
        let status = service.status();
        assert_eq!(status.stats.total_reloads, 1);
        assert_eq!(status.stats.skipped_reloads, 1);
        assert!(!service.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_caller_does_not_interrupt_cycle() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = Arc::new(GatedModule {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
            calls: AtomicUsize::new(0),
        });
        let (_dir, catalog, service) = service_with(ModuleSet::new().with(gated.clone()));

        let caller = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.trigger(TriggerOrigin::Manual).await }
        });
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        release_tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while service.is_running() || service.status().is_running {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let status = service.status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.stats.total_reloads, 1);
        assert_eq!(status.stats.successful_reloads, 1);
        assert_eq!(status.history.len(), 1);
        assert_eq!(service.registry().swap_count(), 1);
        assert!(service.registry().load().resolve("/gated", "GET").is_some());
        assert_eq!(catalog.count_active().unwrap(), 1);
        assert_eq!(service.pipeline.notifier.version(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconcile_keeps_previous_snapshot() {
        let (dir, _catalog, service) = service_with(ModuleSet::new().with(tools_module()));
        assert!(matches!(service.trigger(TriggerOrigin::Startup).await, TriggerOutcome::Completed(_)));

        let before = service.registry().load();
        let swaps_before = service.registry().swap_count();
        let version_before = service.pipeline.notifier.version();

        drop(dir);
        let outcome = service.trigger(TriggerOrigin::Manual).await;
        let report = match outcome {
            TriggerOutcome::Failed(report) => report,
            other => panic!("unexpected outcome: {:?}", other),
        };

        assert_eq!(report.stats, ReconcileStats::default());
        assert!(report.error.as_deref().unwrap().contains("reconciliation failed"));
        assert!(Arc::ptr_eq(&before, &service.registry().load()));
        assert_eq!(service.registry().swap_count(), swaps_before);
        assert_eq!(service.pipeline.notifier.version(), version_before);

        let status = service.status();
        assert_eq!(status.stats.failed_reloads, 1);
        assert!(status.last_error.is_some());
        assert_eq!(status.total_endpoints, 3);
    }
}
