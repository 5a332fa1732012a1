//! SQLite-backed endpoint catalog.
//!
//! Each operation opens its own connection, so the catalog handle is a cheap
//! clonable path and can be moved into blocking tasks freely. The file must
//! already exist after [`SqliteCatalog::open`]; later connections never
//! create it, which makes a vanished database surface as
//! [`CatalogError::Unavailable`] instead of an empty catalog.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use super::error::CatalogError;
use super::record::{AccessTier, EndpointPatch, EndpointRecord, NewRecord, RecordFilter};
use crate::capabilities::ResponseKind;

/// Column list shared by every record query.
pub(crate) const RECORD_COLUMNS: &str = "id, path, method, name, description, category, \
     access_tier, active, parameters, examples, response_kind, source_module_id, priority, \
     last_synced_at, created_at, updated_at";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS endpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL,
        method TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        category TEXT,
        access_tier TEXT NOT NULL DEFAULT 'free',
        active INTEGER NOT NULL DEFAULT 1,
        parameters TEXT NOT NULL DEFAULT '[]',
        examples TEXT NOT NULL DEFAULT '[]',
        response_kind TEXT NOT NULL DEFAULT 'json',
        source_module_id TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        last_synced_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (path, method)
    );
    CREATE INDEX IF NOT EXISTS idx_endpoints_source ON endpoints(source_module_id);
    CREATE INDEX IF NOT EXISTS idx_endpoints_active ON endpoints(active);
";

/// Handle to the SQLite endpoint catalog.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    /// Path to the SQLite database file.
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteCatalog {
    /// Open (creating if needed) the catalog at `db_path` and migrate the schema.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path).map_err(|source| CatalogError::Unavailable {
            path: db_path.display().to_string(),
            source,
        })?;
        conn.execute_batch(SCHEMA)?;
        log::debug!("Endpoint catalog ready at {}", db_path.display());

        Ok(Self {
            db_path,
            busy_timeout: Duration::from_secs(5),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection to the existing database file.
    pub(crate) fn connect(&self) -> Result<Connection, CatalogError> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| CatalogError::Unavailable {
            path: self.db_path.display().to_string(),
            source,
        })?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// List records matching `filter`, highest priority first.
    pub fn list(&self, filter: &RecordFilter) -> Result<Vec<EndpointRecord>, CatalogError> {
        let conn = self.connect()?;
        query_records(&conn, filter)
    }

    /// Fetch one record by `(path, method)`.
    pub fn get(&self, path: &str, method: &str) -> Result<Option<EndpointRecord>, CatalogError> {
        let conn = self.connect()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM endpoints WHERE path = ?1 AND method = ?2", RECORD_COLUMNS),
                params![path, method],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::decode).transpose()
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<EndpointRecord>, CatalogError> {
        let conn = self.connect()?;
        record_by_id(&conn, id)
    }

    pub fn count_active(&self) -> Result<usize, CatalogError> {
        let conn = self.connect()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM endpoints WHERE active = 1", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// SHA-256 over the sorted active `(path, method, tier)` triples.
    ///
    /// Changes whenever the reachable surface or its access policy changes.
    pub fn digest(&self) -> Result<String, CatalogError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT path, method, access_tier FROM endpoints
             WHERE active = 1
             ORDER BY path, method",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut hasher = Sha256::new();
        for row in rows {
            let (path, method, tier) = row?;
            hasher.update(path.as_bytes());
            hasher.update(b"\t");
            hasher.update(method.as_bytes());
            hasher.update(b"\t");
            hasher.update(tier.as_bytes());
            hasher.update(b"\n");
        }
        Ok(hex::encode(hasher.finalize()))
    }

    // -----------------------------------------------------------------------
    // Admin writes
    // -----------------------------------------------------------------------

    /// Insert a row verbatim. The method field is not normalized.
    pub fn insert_raw(&self, record: &NewRecord) -> Result<EndpointRecord, CatalogError> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO endpoints
                (path, method, name, description, category, access_tier, active,
                 source_module_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                record.path,
                record.method,
                record.name,
                record.description,
                record.category,
                record.access_tier.as_str(),
                record.active,
                record.source_module_id,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        record_by_id(&conn, id)?.ok_or(CatalogError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Change one record's access tier. Returns the updated record and the
    /// previous tier, or `None` if the id does not exist.
    pub fn set_access_tier(
        &self,
        id: i64,
        tier: AccessTier,
    ) -> Result<Option<(EndpointRecord, AccessTier)>, CatalogError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let Some(before) = record_by_id(&tx, id)? else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE endpoints SET access_tier = ?1, updated_at = ?2 WHERE id = ?3",
            params![tier.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        let after = record_by_id(&tx, id)?;
        tx.commit()?;
        Ok(after.map(|record| (record, before.access_tier)))
    }

    /// Apply an admin edit to the descriptive fields of one record.
    pub fn update_details(
        &self,
        id: i64,
        patch: &EndpointPatch,
    ) -> Result<Option<EndpointRecord>, CatalogError> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE endpoints SET
                name = COALESCE(?1, name),
                description = COALESCE(?2, description),
                category = COALESCE(?3, category),
                priority = COALESCE(?4, priority),
                updated_at = ?5
             WHERE id = ?6",
            params![
                patch.name,
                patch.description,
                patch.category,
                patch.priority,
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        record_by_id(&conn, id)
    }

    /// Toggle one record's active flag.
    pub fn set_active(&self, id: i64, active: bool) -> Result<Option<EndpointRecord>, CatalogError> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE endpoints SET active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        record_by_id(&conn, id)
    }

    /// Set the access tier of many records in one transaction. Returns how
    /// many rows changed.
    pub fn bulk_set_access_tier(&self, ids: &[i64], tier: AccessTier) -> Result<usize, CatalogError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE endpoints SET access_tier = ?1, updated_at = ?2
                 WHERE id = ?3 AND access_tier != ?1",
            )?;
            for id in ids {
                changed += stmt.execute(params![tier.as_str(), now, id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Hard-delete a record. Returns the deleted row.
    pub fn delete(&self, id: i64) -> Result<Option<EndpointRecord>, CatalogError> {
        let conn = self.connect()?;
        let Some(record) = record_by_id(&conn, id)? else {
            return Ok(None);
        };
        conn.execute("DELETE FROM endpoints WHERE id = ?1", params![id])?;
        Ok(Some(record))
    }
}

// ============================================================================
// Row decoding (shared with the reconciler)
// ============================================================================

pub(crate) fn query_records(
    conn: &Connection,
    filter: &RecordFilter,
) -> Result<Vec<EndpointRecord>, CatalogError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM endpoints
         WHERE (?1 IS NULL OR active = ?1)
           AND (?2 IS NULL OR category = ?2)
           AND (?3 IS NULL OR source_module_id = ?3)
         ORDER BY priority DESC, path, method",
        RECORD_COLUMNS
    ))?;
    let rows = stmt.query_map(
        params![filter.active, filter.category, filter.source_module_id],
        RawRecord::from_row,
    )?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?.decode()?);
    }
    Ok(records)
}

pub(crate) fn record_by_id(conn: &Connection, id: i64) -> Result<Option<EndpointRecord>, CatalogError> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM endpoints WHERE id = ?1", RECORD_COLUMNS),
            params![id],
            RawRecord::from_row,
        )
        .optional()?;
    raw.map(RawRecord::decode).transpose()
}

/// Row as stored, before JSON and timestamp decoding.
pub(crate) struct RawRecord {
    id: i64,
    path: String,
    method: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
    access_tier: String,
    active: bool,
    parameters: String,
    examples: String,
    response_kind: String,
    source_module_id: Option<String>,
    priority: i32,
    last_synced_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            method: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            category: row.get(5)?,
            access_tier: row.get(6)?,
            active: row.get(7)?,
            parameters: row.get(8)?,
            examples: row.get(9)?,
            response_kind: row.get(10)?,
            source_module_id: row.get(11)?,
            priority: row.get(12)?,
            last_synced_at: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    pub(crate) fn decode(self) -> Result<EndpointRecord, CatalogError> {
        let access_tier = self
            .access_tier
            .parse::<AccessTier>()
            .map_err(|_| CatalogError::InvalidColumn {
                column: "access_tier",
                value: self.access_tier.clone(),
            })?;

        Ok(EndpointRecord {
            id: self.id,
            path: self.path,
            method: self.method,
            name: self.name,
            description: self.description,
            category: self.category,
            access_tier,
            active: self.active,
            parameters: serde_json::from_str(&self.parameters)?,
            examples: serde_json::from_str(&self.examples)?,
            response_kind: ResponseKind::parse(&self.response_kind),
            source_module_id: self.source_module_id,
            priority: self.priority,
            last_synced_at: self
                .last_synced_at
                .as_deref()
                .map(|s| parse_timestamp("last_synced_at", s))
                .transpose()?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, CatalogError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CatalogError::InvalidColumn {
            column,
            value: value.to_string(),
        })
}
