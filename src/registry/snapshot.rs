//! Immutable dispatch snapshots.
//!
//! A snapshot joins the canonical descriptors of one cycle with the rows the
//! reconciler just committed and the compiled handlers. It is built off to the
//! side, touches no shared state, and is never mutated once published.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::{CapabilityDescriptor, EndpointHandler, ResponseKind};
use crate::catalog::{AccessTier, EndpointRecord};

/// Raised when descriptors, records and handlers do not line up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotBuildError {
    #[error("no compiled handler for module '{module}' ({method} {path})")]
    MissingHandler {
        module: String,
        path: String,
        method: String,
    },

    #[error("no committed catalog record for {method} {path}")]
    MissingRecord { path: String, method: String },
}

/// The slice of a catalog record the request path needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordProjection {
    pub id: i64,
    pub path: String,
    pub method: String,
    pub name: String,
    pub category: Option<String>,
    pub access_tier: AccessTier,
    pub response_kind: ResponseKind,
    pub source_module_id: Option<String>,
}

impl From<&EndpointRecord> for RecordProjection {
    fn from(record: &EndpointRecord) -> Self {
        Self {
            id: record.id,
            path: record.path.clone(),
            method: record.method.clone(),
            name: record.name.clone(),
            category: record.category.clone(),
            access_tier: record.access_tier,
            response_kind: record.response_kind,
            source_module_id: record.source_module_id.clone(),
        }
    }
}

/// One reachable `(path, method)`.
#[derive(Clone)]
pub struct RouteEntry {
    pub handler: Arc<dyn EndpointHandler>,
    pub record: RecordProjection,
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry").field("record", &self.record).finish()
    }
}

/// Immutable `(path, method) -> route` table.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    version: u64,
    built_at: DateTime<Utc>,
    entries: HashMap<(String, String), RouteEntry>,
}

impl RegistrySnapshot {
    /// The snapshot served before the first successful cycle.
    pub fn empty() -> Self {
        Self {
            version: 0,
            built_at: Utc::now(),
            entries: HashMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn resolve(&self, path: &str, method: &str) -> Option<&RouteEntry> {
        self.entries.get(&(path.to_string(), method.to_string()))
    }

    /// Verbs reachable on `path`, sorted.
    pub fn methods_for(&self, path: &str) -> Vec<String> {
        let mut methods: Vec<String> = self
            .entries
            .keys()
            .filter(|(p, _)| p == path)
            .map(|(_, m)| m.clone())
            .collect();
        methods.sort();
        methods
    }

    /// Projections of every reachable route, sorted by path then method.
    pub fn routes(&self) -> Vec<&RecordProjection> {
        let mut routes: Vec<&RecordProjection> = self.entries.values().map(|e| &e.record).collect();
        routes.sort_by(|a, b| (&a.path, &a.method).cmp(&(&b.path, &b.method)));
        routes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build a snapshot from canonical descriptors, committed records and the
/// compiled handler table.
///
/// Inactive records are left out. The first descriptor for a key wins, the
/// same rule the reconciler applies.
pub fn build_snapshot(
    descriptors: &[CapabilityDescriptor],
    records: &[EndpointRecord],
    handlers: &HashMap<String, Arc<dyn EndpointHandler>>,
    version: u64,
) -> Result<RegistrySnapshot, SnapshotBuildError> {
    let by_key: HashMap<(&str, &str), &EndpointRecord> = records.iter().map(|r| (r.key(), r)).collect();
    let mut entries = HashMap::with_capacity(descriptors.len());

    for descriptor in descriptors {
        let key = (descriptor.path.clone(), descriptor.method.clone());
        if entries.contains_key(&key) {
            continue;
        }

        let record = by_key
            .get(&descriptor.key())
            .ok_or_else(|| SnapshotBuildError::MissingRecord {
                path: descriptor.path.clone(),
                method: descriptor.method.clone(),
            })?;
        if !record.active {
            continue;
        }

        let handler = handlers
            .get(&descriptor.source_module_id)
            .ok_or_else(|| SnapshotBuildError::MissingHandler {
                module: descriptor.source_module_id.clone(),
                path: descriptor.path.clone(),
                method: descriptor.method.clone(),
            })?;

        entries.insert(key, RouteEntry {
            handler: Arc::clone(handler),
            record: RecordProjection::from(*record),
        });
    }

    Ok(RegistrySnapshot {
        version,
        built_at: Utc::now(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::module::test_support::TagHandler;

    fn record(id: i64, path: &str, method: &str, active: bool) -> EndpointRecord {
        let now = Utc::now();
        EndpointRecord {
            id,
            path: path.into(),
            method: method.into(),
            name: path.into(),
            description: None,
            category: None,
            access_tier: AccessTier::Free,
            active,
            parameters: vec![],
            examples: vec![],
            response_kind: ResponseKind::Json,
            source_module_id: Some("tools".into()),
            priority: 0,
            last_synced_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn desc(module: &str, path: &str, method: &str) -> CapabilityDescriptor {
        CapabilityDescriptor {
            source_module_id: module.into(),
            ..CapabilityDescriptor::new(path, method, path)
        }
    }

    fn handlers() -> HashMap<String, Arc<dyn EndpointHandler>> {
        let mut map: HashMap<String, Arc<dyn EndpointHandler>> = HashMap::new();
        map.insert("tools".into(), Arc::new(TagHandler("tools".into())));
        map
    }

    #[test]
    fn test_builds_routes_for_active_records() {
        let snapshot = build_snapshot(
            &[desc("tools", "/x", "GET"), desc("tools", "/x", "POST")],
            &[record(1, "/x", "GET", true), record(2, "/x", "POST", true)],
            &handlers(),
            7,
        )
        .unwrap();

        assert_eq!(snapshot.version(), 7);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.resolve("/x", "POST").unwrap().record.id, 2);
        assert_eq!(snapshot.methods_for("/x"), vec!["GET", "POST"]);
        assert!(snapshot.resolve("/y", "GET").is_none());
    }

    #[test]
    fn test_inactive_records_are_unreachable() {
        let snapshot = build_snapshot(
            &[desc("tools", "/x", "GET")],
            &[record(1, "/x", "GET", false)],
            &handlers(),
            1,
        )
        .unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_missing_handler_or_record_fails() {
        let err = build_snapshot(&[desc("ghost", "/x", "GET")], &[record(1, "/x", "GET", true)], &handlers(), 1)
            .unwrap_err();
        assert!(matches!(err, SnapshotBuildError::MissingHandler { ref module, .. } if module == "ghost"));

        let err = build_snapshot(&[desc("tools", "/x", "GET")], &[], &handlers(), 1).unwrap_err();
        assert_eq!(err, SnapshotBuildError::MissingRecord {
            path: "/x".into(),
            method: "GET".into()
        });
    }
}
