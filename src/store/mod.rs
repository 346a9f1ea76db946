//! Local cache store.
//!
//! One SQLite table of cached events (one row per event id, full event as a
//! JSON column plus indexed scalars) and one table of tombstones for locally
//! deleted ids that still await remote propagation. Multi-statement units
//! run inside a single transaction each; no transaction ever spans a remote
//! call.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, params, params_from_iter};
use tracing::{debug, info};

use crate::error::{CalSyncError, CalSyncResult};
use crate::event::Event;

/// Whether a cached row has been confirmed on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    Pending,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "pending" => SyncStatus::Pending,
            _ => SyncStatus::Synced,
        }
    }
}

/// An event plus its cache-only bookkeeping.
#[derive(Debug, Clone)]
pub struct CachedEvent {
    pub event: Event,
    pub calendar_name: String,
    pub calendar_path: String,
    /// Remote resource name; may differ from the event id.
    pub caldav_filename: String,
    pub sync_status: SyncStatus,
    pub local_modified: DateTime<Utc>,
    /// When this row was last confirmed against the remote. Preserved across
    /// re-pulls in preserve-metadata mode.
    pub synced_at: Option<DateTime<Utc>>,
}

/// A locally deleted id awaiting (or done with) remote propagation.
#[derive(Debug, Clone)]
pub struct Tombstone {
    pub id: String,
    /// Where the row lived when it was deleted, kept so the deletion can be
    /// pushed to the right collection. Absent for tombstones created for
    /// remote-side disappearances.
    pub calendar_name: Option<String>,
    pub caldav_filename: Option<String>,
    pub deleted_at: DateTime<Utc>,
    pub synced_to_remote: bool,
}

pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open (or create) the cache database at the given path.
    pub fn new(db_path: &Path) -> CalSyncResult<Self> {
        debug!("Opening event cache at: {}", db_path.display());
        let conn = Connection::open(db_path)?;
        let store = CacheStore {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        info!("Event cache initialized");
        Ok(store)
    }

    /// In-memory cache, used by tests.
    pub fn in_memory() -> CalSyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = CacheStore {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_tables(&self) -> CalSyncResult<()> {
        let conn = self.conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                calendar_name TEXT NOT NULL,
                calendar_path TEXT NOT NULL,
                caldav_filename TEXT NOT NULL,
                start_day TEXT NOT NULL,
                start_utc TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                local_modified TEXT NOT NULL,
                synced_at TEXT,
                data TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tombstones (
                id TEXT PRIMARY KEY,
                calendar_name TEXT,
                caldav_filename TEXT,
                deleted_at TEXT NOT NULL,
                synced_to_remote INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_start_day ON events (start_day)",
            [],
        )?;
        Ok(())
    }

    /// Insert or replace rows by id as one atomic batch.
    ///
    /// With `preserve_metadata` (the pull path), `synced_at` keeps its prior
    /// value when one exists so re-pulling unchanged events does not reset
    /// staleness bookkeeping; every other field is overwritten. Without it
    /// (local create/update), everything including `synced_at` is taken from
    /// the incoming row.
    pub fn upsert_many(&self, rows: &[CachedEvent], preserve_metadata: bool) -> CalSyncResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let sql = if preserve_metadata {
                "INSERT INTO events (id, calendar_name, calendar_path, caldav_filename,
                     start_day, start_utc, sync_status, local_modified, synced_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     calendar_name = excluded.calendar_name,
                     calendar_path = excluded.calendar_path,
                     caldav_filename = excluded.caldav_filename,
                     start_day = excluded.start_day,
                     start_utc = excluded.start_utc,
                     sync_status = excluded.sync_status,
                     local_modified = excluded.local_modified,
                     synced_at = COALESCE(events.synced_at, excluded.synced_at),
                     data = excluded.data"
            } else {
                "INSERT OR REPLACE INTO events (id, calendar_name, calendar_path, caldav_filename,
                     start_day, start_utc, sync_status, local_modified, synced_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            };
            let mut stmt = tx.prepare(sql)?;
            for row in rows {
                let data = serde_json::to_string(&row.event)?;
                stmt.execute(params![
                    row.event.id,
                    row.calendar_name,
                    row.calendar_path,
                    row.caldav_filename,
                    row.event.start_day().format("%Y-%m-%d").to_string(),
                    row.event.start_utc().to_rfc3339(),
                    row.sync_status.as_str(),
                    row.local_modified.to_rfc3339(),
                    row.synced_at.map(|t| t.to_rfc3339()),
                    data,
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = rows.len(), preserve_metadata, "Upserted cache rows");
        Ok(())
    }

    /// Events with a start day inside the inclusive range, optionally
    /// filtered by calendar, in ascending start order.
    pub fn query(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        calendar_name: Option<&str>,
    ) -> CalSyncResult<Vec<Event>> {
        let mut sql = String::from("SELECT data FROM events WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some(start) = start {
            sql.push_str(" AND start_day >= ?");
            args.push(start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = end {
            sql.push_str(" AND start_day <= ?");
            args.push(end.format("%Y-%m-%d").to_string());
        }
        if let Some(name) = calendar_name {
            sql.push_str(" AND calendar_name = ?");
            args.push(name.to_string());
        }
        sql.push_str(" ORDER BY start_utc ASC");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_from_iter(args), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<String>, _>>()?
            .into_iter()
            .map(|data| serde_json::from_str(&data).map_err(CalSyncError::from))
            .collect::<CalSyncResult<Vec<Event>>>()?;

        Ok(events)
    }

    /// Load one cached row by id.
    pub fn get(&self, id: &str) -> CalSyncResult<Option<CachedEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT calendar_name, calendar_path, caldav_filename, sync_status,
                    local_modified, synced_at, data
             FROM events WHERE id = ?1",
        )?;

        let result = stmt.query_row(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        });

        match result {
            Ok((calendar_name, calendar_path, caldav_filename, status, modified, synced, data)) => {
                Ok(Some(CachedEvent {
                    event: serde_json::from_str(&data)?,
                    calendar_name,
                    calendar_path,
                    caldav_filename,
                    sync_status: SyncStatus::from_str(&status),
                    local_modified: parse_timestamp(&modified)?,
                    synced_at: synced.as_deref().map(parse_timestamp).transpose()?,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the row for an id and record an unsynced tombstone for it, as
    /// one transaction. The tombstone captures the row's calendar and remote
    /// filename so the deletion can be propagated. Returns whether a row
    /// existed.
    pub fn delete(&self, id: &str) -> CalSyncResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let origin: Option<(String, String)> = match tx.query_row(
            "SELECT calendar_name, caldav_filename FROM events WHERE id = ?1",
            params![id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        ) {
            Ok(pair) => Some(pair),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let removed = tx.execute("DELETE FROM events WHERE id = ?1", params![id])?;
        tx.execute(
            "INSERT OR REPLACE INTO tombstones (id, calendar_name, caldav_filename, deleted_at, synced_to_remote)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                id,
                origin.as_ref().map(|(c, _)| c),
                origin.as_ref().map(|(_, f)| f),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        debug!(id, removed = removed > 0, "Deleted event and recorded tombstone");
        Ok(removed > 0)
    }

    /// Remove a row that disappeared on the remote side: the row goes away
    /// and an already-synced tombstone is recorded, so no remote delete is
    /// ever pushed for it and a genuine reappearance may be pulled back in.
    pub fn remove_disappeared(&self, id: &str) -> CalSyncResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events WHERE id = ?1", params![id])?;
        tx.execute(
            "INSERT OR REPLACE INTO tombstones (id, calendar_name, caldav_filename, deleted_at, synced_to_remote)
             VALUES (?1, NULL, NULL, ?2, 1)",
            params![id, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Rows waiting to be pushed to the remote.
    pub fn list_pending_writes(&self) -> CalSyncResult<Vec<CachedEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM events WHERE sync_status = 'pending' ORDER BY start_utc ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.get(&id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn mark_synced(&self, id: &str) -> CalSyncResult<()> {
        self.conn().execute(
            "UPDATE events SET sync_status = 'synced', synced_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Tombstones whose deletion has not been confirmed remotely.
    pub fn list_unsynced_tombstones(&self) -> CalSyncResult<Vec<Tombstone>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, calendar_name, caldav_filename, deleted_at, synced_to_remote
             FROM tombstones WHERE synced_to_remote = 0",
        )?;
        let tombstones = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, calendar_name, caldav_filename, deleted_at, synced)| {
                Ok(Tombstone {
                    id,
                    calendar_name,
                    caldav_filename,
                    deleted_at: parse_timestamp(&deleted_at)?,
                    synced_to_remote: synced,
                })
            })
            .collect::<CalSyncResult<Vec<Tombstone>>>()?;
        Ok(tombstones)
    }

    /// Every tombstoned id, regardless of sync state.
    pub fn all_tombstone_ids(&self) -> CalSyncResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM tombstones")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn mark_tombstone_synced(&self, id: &str) -> CalSyncResult<()> {
        self.conn().execute(
            "UPDATE tombstones SET synced_to_remote = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Every cached id with its calendar and sync status.
    pub fn all_ids(&self) -> CalSyncResult<Vec<(String, String, SyncStatus)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, calendar_name, sync_status FROM events")?;
        let ids = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, calendar, status)| (id, calendar, SyncStatus::from_str(&status)))
            .collect();
        Ok(ids)
    }

    /// Drop cache rows whose start is older than the horizon. Returns the
    /// number of rows removed.
    pub fn prune_stale_rows(&self, older_than: DateTime<Utc>) -> CalSyncResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM events WHERE start_utc < ?1",
            params![older_than.to_rfc3339()],
        )?;
        if removed > 0 {
            debug!(removed, "Pruned stale cache rows");
        }
        Ok(removed)
    }

    /// Drop tombstones whose deletion has been synced and is older than the
    /// horizon. Returns the number removed.
    pub fn prune_synced_tombstones(&self, older_than: DateTime<Utc>) -> CalSyncResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM tombstones WHERE synced_to_remote = 1 AND deleted_at < ?1",
            params![older_than.to_rfc3339()],
        )?;
        Ok(removed)
    }

    /// Most recent `synced_at` across all rows; absent when nothing has ever
    /// been confirmed against the remote.
    pub fn last_synced_at(&self) -> CalSyncResult<Option<DateTime<Utc>>> {
        let latest: Option<String> = self.conn().query_row(
            "SELECT MAX(synced_at) FROM events",
            [],
            |row| row.get(0),
        )?;
        latest.as_deref().map(parse_timestamp).transpose()
    }

    /// Number of cached events, optionally per calendar.
    pub fn count(&self, calendar_name: Option<&str>) -> CalSyncResult<i64> {
        let conn = self.conn();
        let count: i64 = match calendar_name {
            Some(name) => conn.query_row(
                "SELECT COUNT(*) FROM events WHERE calendar_name = ?1",
                params![name],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?,
        };
        Ok(count)
    }
}

fn parse_timestamp(s: &str) -> CalSyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CalSyncError::Sync(format!("Bad timestamp in cache: {}", e)))
}
