//! Reconciler - transactional sync of canonical descriptors into the catalog.
//!
//! One call is one SQLite transaction:
//!
//! 1. purge rows whose method field still holds several verbs
//! 2. upsert every descriptor by `(path, method)`
//! 3. deactivate module-owned rows that are no longer declared
//! 4. read back the active rows and commit
//!
//! Any error rolls the whole transaction back; the transaction is dropped
//! uncommitted on every early return.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use super::error::CatalogError;
use super::record::{AccessTier, EndpointRecord, RecordFilter, UnknownTier};
use super::store::{query_records, SqliteCatalog};
use crate::capabilities::normalize::is_multi_verb;
use crate::capabilities::CapabilityDescriptor;

/// What happens to an existing record's access tier on re-sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierSyncPolicy {
    /// Keep whatever tier an admin assigned.
    #[default]
    Preserve,
    /// Reset every re-synced record to `free`.
    Reset,
}

impl fmt::Display for TierSyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierSyncPolicy::Preserve => f.write_str("preserve"),
            TierSyncPolicy::Reset => f.write_str("reset"),
        }
    }
}

impl FromStr for TierSyncPolicy {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" => Ok(TierSyncPolicy::Preserve),
            "reset" => Ok(TierSyncPolicy::Reset),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePolicy {
    #[serde(default)]
    pub tier_sync: TierSyncPolicy,
}

/// Row counts from one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    /// Multi-verb rows deleted.
    pub purged: usize,
    pub skipped: usize,
}

/// Result of a committed reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub stats: ReconcileStats,
    /// Active rows as committed, read inside the same transaction.
    pub records: Vec<EndpointRecord>,
}

/// Outcome report. On failure every counter is zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub success: bool,
    #[serde(flatten)]
    pub stats: ReconcileStats,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Syncs canonical descriptors into a [`SqliteCatalog`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    catalog: SqliteCatalog,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(catalog: SqliteCatalog, policy: ReconcilePolicy) -> Self {
        Self { catalog, policy }
    }

    pub fn catalog(&self) -> &SqliteCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Reconcile and report, swallowing the error into the report.
    pub fn run(&self, descriptors: &[CapabilityDescriptor]) -> ReconcileReport {
        let started = Instant::now();
        match self.reconcile(descriptors) {
            Ok(reconciled) => ReconcileReport {
                success: true,
                stats: reconciled.stats,
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => ReconcileReport {
                success: false,
                stats: ReconcileStats::default(),
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
        }
    }

    /// Run the full reconciliation in one transaction.
    ///
    /// `descriptors` must already be normalized (one verb each).
    pub fn reconcile(&self, descriptors: &[CapabilityDescriptor]) -> Result<Reconciled, CatalogError> {
        let mut conn = self.catalog.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut stats = ReconcileStats::default();

        stats.purged = purge_multi_verb(&tx)?;

        let mut seen: HashSet<(String, String)> = HashSet::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let key = (descriptor.path.clone(), descriptor.method.clone());
            if !seen.insert(key) {
                log::warn!(
                    "Duplicate endpoint {} {} from module '{}' ignored",
                    descriptor.method,
                    descriptor.path,
                    descriptor.source_module_id
                );
                stats.skipped += 1;
                continue;
            }

            if upsert(&tx, descriptor, self.policy.tier_sync, &now)? {
                stats.created += 1;
            } else {
                stats.updated += 1;
            }
        }

        stats.deactivated = deactivate_orphans(&tx, &seen, &now)?;

        let records = query_records(&tx, &RecordFilter::active_only())?;
        tx.commit()?;

        log::info!(
            "Catalog reconciled: {} created, {} updated, {} deactivated, {} purged, {} skipped",
            stats.created,
            stats.updated,
            stats.deactivated,
            stats.purged,
            stats.skipped
        );

        Ok(Reconciled { stats, records })
    }
}

fn purge_multi_verb(tx: &Transaction<'_>) -> Result<usize, CatalogError> {
    let corrupt: Vec<(i64, String, String, String)> = {
        let mut stmt = tx.prepare("SELECT id, path, method, access_tier FROM endpoints")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|(_, _, method, _): &(i64, String, String, String)| is_multi_verb(method))
            .collect()
    };

    for (id, path, method, tier) in &corrupt {
        log::warn!("Purging corrupt catalog row {} ({} '{}'): multiple verbs", id, path, method);
        if tier != AccessTier::Free.as_str() {
            // The single-verb rows recreated by the upsert start at `free`.
            log::warn!(
                "Access tier '{}' of purged row {} ({}) is lost; reassign it per method",
                tier,
                id,
                path
            );
        }
        tx.execute("DELETE FROM endpoints WHERE id = ?1", params![id])?;
    }
    Ok(corrupt.len())
}

/// Returns `true` when a row was created.
fn upsert(
    tx: &Transaction<'_>,
    descriptor: &CapabilityDescriptor,
    tier_sync: TierSyncPolicy,
    now: &str,
) -> Result<bool, CatalogError> {
    let parameters = serde_json::to_string(&descriptor.parameters)?;
    let examples = serde_json::to_string(&descriptor.examples)?;
    let source = Some(descriptor.source_module_id.as_str()).filter(|s| !s.is_empty());

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM endpoints WHERE path = ?1 AND method = ?2",
            params![descriptor.path, descriptor.method],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        None => {
            tx.execute(
                "INSERT INTO endpoints
                    (path, method, name, description, category, access_tier, active,
                     parameters, examples, response_kind, source_module_id, priority,
                     last_synced_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'free', 1, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?11)",
                params![
                    descriptor.path,
                    descriptor.method,
                    descriptor.name,
                    descriptor.description,
                    descriptor.category,
                    parameters,
                    examples,
                    descriptor.response_kind.as_str(),
                    source,
                    descriptor.priority,
                    now,
                ],
            )?;
            Ok(true)
        }
        Some(id) => {
            tx.execute(
                "UPDATE endpoints SET
                    name = ?1,
                    description = ?2,
                    category = COALESCE(?3, category),
                    parameters = ?4,
                    examples = ?5,
                    response_kind = ?6,
                    source_module_id = ?7,
                    priority = ?8,
                    active = 1,
                    access_tier = CASE WHEN ?9 THEN 'free' ELSE access_tier END,
                    last_synced_at = ?10,
                    updated_at = ?10
                 WHERE id = ?11",
                params![
                    descriptor.name,
                    descriptor.description,
                    descriptor.category,
                    parameters,
                    examples,
                    descriptor.response_kind.as_str(),
                    source,
                    descriptor.priority,
                    tier_sync == TierSyncPolicy::Reset,
                    now,
                    id,
                ],
            )?;
            Ok(false)
        }
    }
}

fn deactivate_orphans(
    tx: &Transaction<'_>,
    seen: &HashSet<(String, String)>,
    now: &str,
) -> Result<usize, CatalogError> {
    let owned: Vec<(i64, String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT id, path, method FROM endpoints
             WHERE source_module_id IS NOT NULL AND active = 1",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let mut deactivated = 0;
    for (id, path, method) in owned {
        if seen.contains(&(path.clone(), method.clone())) {
            continue;
        }
        log::info!("Deactivating orphaned endpoint {} {}", method, path);
        deactivated += tx.execute(
            "UPDATE endpoints SET active = 0, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
    }
    Ok(deactivated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::normalize;
    use crate::catalog::record::{AccessTier, NewRecord};

    fn setup() -> (tempfile::TempDir, SqliteCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SqliteCatalog::open(dir.path().join("catalog.db")).unwrap();
        (dir, catalog)
    }

    fn desc(module: &str, path: &str, method: &str) -> CapabilityDescriptor {
        let mut d = CapabilityDescriptor::new(path, method, format!("Endpoint {}", path));
        d.source_module_id = module.to_string();
        d
    }

    fn canonical(descs: Vec<CapabilityDescriptor>) -> Vec<CapabilityDescriptor> {
        normalize(descs).descriptors
    }

    #[test]
    fn test_multi_verb_descriptor_creates_one_row_per_verb() {
        let (_dir, catalog) = setup();
        let reconciler = Reconciler::new(catalog.clone(), ReconcilePolicy::default());

        let descs = canonical(vec![CapabilityDescriptor {
            source_module_id: "tools".into(),
            ..CapabilityDescriptor::new("/x", "GET, POST", "X")
        }]);
        let reconciled = reconciler.reconcile(&descs).unwrap();

        assert_eq!(reconciled.stats.created, 2);
        assert_eq!(reconciled.records.len(), 2);
        let get = catalog.get("/x", "GET").unwrap().unwrap();
        let post = catalog.get("/x", "POST").unwrap().unwrap();
        assert!(get.active && post.active);
        assert_eq!(get.access_tier, AccessTier::Free);
        assert!(get.last_synced_at.is_some());
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let (_dir, catalog) = setup();
        let reconciler = Reconciler::new(catalog, ReconcilePolicy::default());
        let descs = canonical(vec![desc("a", "/one", "GET"), desc("a", "/two", "GET,POST")]);

        let first = reconciler.run(&descs);
        assert!(first.success);
        assert_eq!(first.stats.created, 3);

        let second = reconciler.run(&descs);
        assert!(second.success);
        assert_eq!(second.stats.created, 0);
        assert_eq!(second.stats.deactivated, 0);
        assert_eq!(second.stats.updated, 3);
    }

    #[test]
    fn test_removed_module_is_deactivated_not_deleted() {
        let (_dir, catalog) = setup();
        let reconciler = Reconciler::new(catalog.clone(), ReconcilePolicy::default());

        reconciler
            .reconcile(&canonical(vec![desc("a", "/a", "GET"), desc("b", "/b", "GET")]))
            .unwrap();
        let reconciled = reconciler.reconcile(&canonical(vec![desc("a", "/a", "GET")])).unwrap();

        assert_eq!(reconciled.stats.deactivated, 1);
        assert_eq!(reconciled.records.len(), 1);
        let orphan = catalog.get("/b", "GET").unwrap().unwrap();
        assert!(!orphan.active);

        // Already inactive: not counted again.
        let again = reconciler.reconcile(&canonical(vec![desc("a", "/a", "GET")])).unwrap();
        assert_eq!(again.stats.deactivated, 0);
    }

    #[test]
    fn test_admin_rows_without_module_are_left_alone() {
        let (_dir, catalog) = setup();
        catalog.insert_raw(&NewRecord::new("/manual", "GET", "Manual")).unwrap();
        let reconciler = Reconciler::new(catalog.clone(), ReconcilePolicy::default());

        let reconciled = reconciler.reconcile(&[]).unwrap();
        assert_eq!(reconciled.stats.deactivated, 0);
        assert!(catalog.get("/manual", "GET").unwrap().unwrap().active);
    }

    #[test]
    fn test_multi_verb_rows_are_purged() {
        let (_dir, catalog) = setup();
        catalog
            .insert_raw(&NewRecord::new("/legacy", "GET,POST", "Legacy").with_source_module("old"))
            .unwrap();
        let reconciler = Reconciler::new(catalog.clone(), ReconcilePolicy::default());

        let reconciled = reconciler
            .reconcile(&canonical(vec![desc("old", "/legacy", "GET,POST")]))
            .unwrap();

        assert_eq!(reconciled.stats.purged, 1);
        assert_eq!(reconciled.stats.created, 2);
        let all = catalog.list(&RecordFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| !r.method.contains(',')));
    }

    #[test]
    fn test_purged_row_tier_is_not_carried_over() {
        let (_dir, catalog) = setup();
        catalog
            .insert_raw(
                &NewRecord::new("/legacy", "GET,POST", "Legacy")
                    .with_source_module("old")
                    .with_access_tier(AccessTier::Vip),
            )
            .unwrap();
        let reconciler = Reconciler::new(catalog.clone(), ReconcilePolicy::default());

        let reconciled = reconciler
            .reconcile(&canonical(vec![desc("old", "/legacy", "GET,POST")]))
            .unwrap();

        assert_eq!(reconciled.stats.purged, 1);
        for method in ["GET", "POST"] {
            let record = catalog.get("/legacy", method).unwrap().unwrap();
            assert_eq!(record.access_tier, AccessTier::Free);
        }
    }

    #[test]
    fn test_duplicate_key_first_wins() {
        let (_dir, catalog) = setup();
        let reconciler = Reconciler::new(catalog.clone(), ReconcilePolicy::default());
        let mut second = desc("b", "/dup", "GET");
        second.name = "Second".into();

        let reconciled = reconciler.reconcile(&[desc("a", "/dup", "GET"), second]).unwrap();

        assert_eq!(reconciled.stats.created, 1);
        assert_eq!(reconciled.stats.skipped, 1);
        let record = catalog.get("/dup", "GET").unwrap().unwrap();
        assert_eq!(record.name, "Endpoint /dup");
        assert_eq!(record.source_module_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_tier_policy_preserve_and_reset() {
        let (_dir, catalog) = setup();
        let descs = canonical(vec![desc("a", "/paid", "GET")]);
        let preserve = Reconciler::new(catalog.clone(), ReconcilePolicy::default());
        preserve.reconcile(&descs).unwrap();

        let id = catalog.get("/paid", "GET").unwrap().unwrap().id;
        catalog.set_access_tier(id, AccessTier::Premium).unwrap();

        preserve.reconcile(&descs).unwrap();
        assert_eq!(catalog.get_by_id(id).unwrap().unwrap().access_tier, AccessTier::Premium);

        let reset = Reconciler::new(catalog.clone(), ReconcilePolicy {
            tier_sync: TierSyncPolicy::Reset,
        });
        reset.reconcile(&descs).unwrap();
        assert_eq!(catalog.get_by_id(id).unwrap().unwrap().access_tier, AccessTier::Free);
    }

    #[test]
    fn test_category_kept_when_descriptor_omits_it() {
        let (_dir, catalog) = setup();
        let reconciler = Reconciler::new(catalog.clone(), ReconcilePolicy::default());

        reconciler
            .reconcile(&[desc("a", "/c", "GET").with_category("search")])
            .unwrap();
        reconciler.reconcile(&[desc("a", "/c", "GET")]).unwrap();
        assert_eq!(catalog.get("/c", "GET").unwrap().unwrap().category.as_deref(), Some("search"));

        reconciler
            .reconcile(&[desc("a", "/c", "GET").with_category("tools")])
            .unwrap();
        assert_eq!(catalog.get("/c", "GET").unwrap().unwrap().category.as_deref(), Some("tools"));
    }

    #[test]
    fn test_failure_rolls_back_everything() {
        let (_dir, catalog) = setup();
        let reconciler = Reconciler::new(catalog.clone(), ReconcilePolicy::default());
        reconciler.reconcile(&[desc("a", "/keep", "GET")]).unwrap();

        catalog
            .connect()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_boom BEFORE INSERT ON endpoints
                 WHEN NEW.path = '/boom'
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();

        let report = reconciler.run(&[desc("a", "/new", "GET"), desc("a", "/boom", "GET")]);

        assert!(!report.success);
        assert_eq!(report.stats, ReconcileStats::default());
        assert!(report.error.as_deref().unwrap_or_default().contains("boom"));
        assert!(catalog.get("/new", "GET").unwrap().is_none());
        // The orphan pass never ran, so /keep is still active.
        assert!(catalog.get("/keep", "GET").unwrap().unwrap().active);
    }

    #[test]
    fn test_unavailable_database_reports_failure() {
        let (dir, catalog) = setup();
        let reconciler = Reconciler::new(catalog, ReconcilePolicy::default());
        drop(dir);

        let report = reconciler.run(&[desc("a", "/x", "GET")]);
        assert!(!report.success);
        assert_eq!(report.stats, ReconcileStats::default());
        assert!(report.error.is_some());
    }

    #[test]
    fn test_tier_policy_parse() {
        assert_eq!("Reset".parse::<TierSyncPolicy>().unwrap(), TierSyncPolicy::Reset);
        assert_eq!(TierSyncPolicy::default().to_string(), "preserve");
        assert!("keep".parse::<TierSyncPolicy>().is_err());
    }
}
