//! Change events and the messages live subscribers receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{AccessTier, EndpointRecord, ReconcileStats};

/// What changed. Single-entity kinds carry the full record; bulk and sync
/// kinds carry only aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ChangeKind {
    Created {
        record: EndpointRecord,
    },
    Updated {
        record: EndpointRecord,
    },
    Deleted {
        record: EndpointRecord,
    },
    /// Access tier changed.
    StatusChanged {
        record: EndpointRecord,
        previous: AccessTier,
    },
    ActiveToggled {
        record: EndpointRecord,
    },
    BulkChanged {
        count: usize,
    },
    /// A reload cycle committed.
    SyncCompleted {
        stats: ReconcileStats,
        total_endpoints: usize,
    },
}

/// A catalog change with its identity and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn created(record: EndpointRecord) -> Self {
        Self::new(ChangeKind::Created { record })
    }

    pub fn updated(record: EndpointRecord) -> Self {
        Self::new(ChangeKind::Updated { record })
    }

    pub fn deleted(record: EndpointRecord) -> Self {
        Self::new(ChangeKind::Deleted { record })
    }

    pub fn status_changed(record: EndpointRecord, previous: AccessTier) -> Self {
        Self::new(ChangeKind::StatusChanged { record, previous })
    }

    pub fn active_toggled(record: EndpointRecord) -> Self {
        Self::new(ChangeKind::ActiveToggled { record })
    }

    pub fn bulk_changed(count: usize) -> Self {
        Self::new(ChangeKind::BulkChanged { count })
    }

    pub fn sync_completed(stats: ReconcileStats, total_endpoints: usize) -> Self {
        Self::new(ChangeKind::SyncCompleted {
            stats,
            total_endpoints,
        })
    }

    /// Event type name, as used on the wire.
    pub fn event_type(&self) -> &'static str {
        match &self.kind {
            ChangeKind::Created { .. } => "created",
            ChangeKind::Updated { .. } => "updated",
            ChangeKind::Deleted { .. } => "deleted",
            ChangeKind::StatusChanged { .. } => "status_changed",
            ChangeKind::ActiveToggled { .. } => "active_toggled",
            ChangeKind::BulkChanged { .. } => "bulk_changed",
            ChangeKind::SyncCompleted { .. } => "sync_completed",
        }
    }

    /// The affected record, for single-entity events.
    pub fn record(&self) -> Option<&EndpointRecord> {
        match &self.kind {
            ChangeKind::Created { record }
            | ChangeKind::Updated { record }
            | ChangeKind::Deleted { record }
            | ChangeKind::StatusChanged { record, .. }
            | ChangeKind::ActiveToggled { record } => Some(record),
            ChangeKind::BulkChanged { .. } | ChangeKind::SyncCompleted { .. } => None,
        }
    }

    /// Whether dependent caches must re-read the whole catalog.
    pub fn needs_full_refresh(&self) -> bool {
        self.record().is_none()
    }
}

/// What a live subscriber receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum LiveMessage {
    Change(ChangeEvent),
    Ping { timestamp: DateTime<Utc> },
}

impl LiveMessage {
    pub fn ping() -> Self {
        LiveMessage::Ping {
            timestamp: Utc::now(),
        }
    }
}
