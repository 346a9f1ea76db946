//! The reconciliation state machine.
//!
//! One full pass runs six fixed steps: push deletions, pull, merge, detect
//! remote disappearance, push pending writes, prune. The order matters: a
//! pull must never resurrect an event whose delete push is still in flight,
//! so deletions go out first and the merge drops anything tombstoned at the
//! start of the pass. Each step absorbs its own errors; one failing step
//! never blocks the later ones.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::directory::CalendarDirectory;
use crate::error::CalSyncResult;
use crate::event::{Event, EventTime};
use crate::gateway::{CalendarGateway, filename_for_id};
use crate::store::{CacheStore, CachedEvent, SyncStatus, Tombstone};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// True when a pass was already in flight and this trigger was a no-op.
    pub skipped: bool,
    /// Pulled event count per calendar; -1 marks a calendar whose pull failed.
    pub calendar_counts: HashMap<String, i64>,
    pub pushed_deletes: usize,
    pub pushed_writes: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn skipped() -> Self {
        SyncReport {
            skipped: true,
            ..Default::default()
        }
    }
}

/// One calendar as reported to external callers.
#[derive(Debug, Clone)]
pub struct CalendarSummary {
    pub name: String,
    pub display_name: String,
    /// Cached event count; -1 when the calendar's state is unknown.
    pub count: i64,
}

/// Resets the in-flight flag when a pass ends, also on early return.
struct FlagGuard(Arc<AtomicBool>);

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    gateway: Arc<CalendarGateway>,
    store: Arc<CacheStore>,
    directory: CalendarDirectory,
    /// Single-flight guard shared with whoever else may trigger a pass.
    in_flight: Arc<AtomicBool>,
    /// Per-calendar counts from the most recent pass, kept for
    /// [`list_calendars`](Self::list_calendars).
    calendar_counts: Arc<Mutex<HashMap<String, i64>>>,
    sync_interval: Duration,
    event_retention: Duration,
    tombstone_retention: Duration,
}

impl SyncEngine {
    pub fn new(
        gateway: Arc<CalendarGateway>,
        store: Arc<CacheStore>,
        directory: CalendarDirectory,
        config: &SyncConfig,
        in_flight: Arc<AtomicBool>,
    ) -> Self {
        SyncEngine {
            gateway,
            store,
            directory,
            in_flight,
            calendar_counts: Arc::new(Mutex::new(HashMap::new())),
            sync_interval: config.sync_interval(),
            event_retention: Duration::days(config.event_retention_days),
            tombstone_retention: Duration::days(config.tombstone_retention_days),
        }
    }

    /// Run one full reconciliation pass, unless one is already running, in
    /// which case the trigger is dropped and a skipped report returned.
    pub async fn force_sync(&self) -> SyncReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in flight; dropping trigger");
            return SyncReport::skipped();
        }
        let _guard = FlagGuard(self.in_flight.clone());

        let report = self.run_pass().await;

        let mut counts = self.counts();
        for (name, count) in &report.calendar_counts {
            counts.insert(name.clone(), *count);
        }
        drop(counts);

        info!(
            pushed_deletes = report.pushed_deletes,
            pushed_writes = report.pushed_writes,
            errors = report.errors.len(),
            "Sync pass finished"
        );
        report
    }

    async fn run_pass(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let now = Utc::now();

        // Snapshot taken before step 1 marks anything synced: the merge in
        // step 3 must drop pulled copies of ids that entered this pass with a
        // pending local delete.
        let pending_deletes: Vec<Tombstone> = match self.store.list_unsynced_tombstones() {
            Ok(tombstones) => tombstones,
            Err(e) => {
                warn!("Cannot read pending deletions, skipping deletion push: {}", e);
                report.errors.push(e.to_string());
                Vec::new()
            }
        };
        let blocked_ids: HashSet<String> =
            pending_deletes.iter().map(|t| t.id.clone()).collect();

        // Step 1: push deletions.
        for tombstone in &pending_deletes {
            self.push_deletion(tombstone).await;
            report.pushed_deletes += 1;
        }

        // Cache state before any pulled row lands, for step 4.
        let prior_ids = match self.store.all_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Cannot snapshot cached ids: {}", e);
                report.errors.push(e.to_string());
                Vec::new()
            }
        };

        // Step 2: pull every calendar; one failure never blocks the others.
        let mut pulled: Vec<CachedEvent> = Vec::new();
        let mut pulled_ids: HashSet<String> = HashSet::new();
        let mut ok_calendars: HashSet<String> = HashSet::new();
        for collection in self.directory.iter() {
            match self.gateway.fetch_all(&collection.name).await {
                Ok(events) => {
                    report
                        .calendar_counts
                        .insert(collection.name.clone(), events.len() as i64);
                    ok_calendars.insert(collection.name.clone());
                    for (event, filename) in events {
                        pulled_ids.insert(event.id.clone());
                        pulled.push(CachedEvent {
                            event,
                            calendar_name: collection.name.clone(),
                            calendar_path: collection.path.clone(),
                            caldav_filename: filename,
                            sync_status: SyncStatus::Synced,
                            local_modified: now,
                            synced_at: Some(now),
                        });
                    }
                }
                Err(e) => {
                    warn!(calendar = %collection.name, "Pull failed: {}", e);
                    report
                        .calendar_counts
                        .insert(collection.name.clone(), -1);
                    report.errors.push(format!("{}: {}", collection.name, e));
                }
            }
        }

        // Step 3: merge, tombstone wins.
        let merged: Vec<CachedEvent> = pulled
            .into_iter()
            .filter(|row| !blocked_ids.contains(&row.event.id))
            .collect();
        if let Err(e) = self.store.upsert_many(&merged, true) {
            warn!("Merge of pulled events failed: {}", e);
            report.errors.push(e.to_string());
        }

        // Step 4: ids cached before the pass but gone from a calendar that
        // pulled cleanly have disappeared remotely. Tombstone them without a
        // remote delete. Pending rows are exempt: they have never been
        // pushed, so their remote absence means nothing.
        let tombstoned: HashSet<String> = match self.store.all_tombstone_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!("Cannot list tombstones: {}", e);
                report.errors.push(e.to_string());
                HashSet::new()
            }
        };
        for (id, calendar, status) in prior_ids {
            if status == SyncStatus::Pending
                || !ok_calendars.contains(&calendar)
                || pulled_ids.contains(&id)
                || tombstoned.contains(&id)
            {
                continue;
            }
            debug!(id, calendar, "Event disappeared remotely, dropping cached copy");
            if let Err(e) = self.store.remove_disappeared(&id) {
                warn!(id, "Failed to drop disappeared event: {}", e);
                report.errors.push(e.to_string());
            }
        }

        // Step 5: push pending local writes.
        match self.store.list_pending_writes() {
            Ok(rows) => {
                for row in rows {
                    if self.push_row(&row).await {
                        report.pushed_writes += 1;
                    }
                }
            }
            Err(e) => {
                warn!("Cannot list pending writes: {}", e);
                report.errors.push(e.to_string());
            }
        }

        // Step 6: prune.
        if let Err(e) = self.store.prune_stale_rows(now - self.event_retention) {
            warn!("Pruning stale rows failed: {}", e);
            report.errors.push(e.to_string());
        }
        if let Err(e) = self
            .store
            .prune_synced_tombstones(now - self.tombstone_retention)
        {
            warn!("Pruning tombstones failed: {}", e);
            report.errors.push(e.to_string());
        }

        report
    }

    /// Best-effort remote delete for one tombstone. The tombstone is marked
    /// synced regardless of the outcome: retrying forever would wedge every
    /// later pass behind an undeletable resource, and an orphaned remote
    /// event is the lesser problem.
    async fn push_deletion(&self, tombstone: &Tombstone) {
        let pushed = match (&tombstone.calendar_name, &tombstone.caldav_filename) {
            (Some(calendar), Some(filename)) => self.gateway.delete(calendar, filename).await,
            _ => {
                // Origin unknown, so try every configured calendar.
                let filename = filename_for_id(&tombstone.id);
                let mut any = false;
                for collection in self.directory.iter() {
                    any |= self.gateway.delete(&collection.name, &filename).await;
                }
                any
            }
        };
        if !pushed {
            warn!(id = %tombstone.id, "Deletion push failed, marking tombstone synced anyway");
        }
        if let Err(e) = self.store.mark_tombstone_synced(&tombstone.id) {
            warn!(id = %tombstone.id, "Failed to mark tombstone synced: {}", e);
        }
    }

    /// Push one pending row as delete-then-create. The delete may hit a
    /// resource that does not exist yet; that failure is meaningless and is
    /// swallowed.
    async fn push_row(&self, row: &CachedEvent) -> bool {
        let _ = self
            .gateway
            .delete(&row.calendar_name, &row.caldav_filename)
            .await;

        if !self.gateway.create(&row.calendar_name, &row.event).await {
            debug!(id = %row.event.id, "Push rejected, row stays pending");
            return false;
        }
        match self.store.mark_synced(&row.event.id) {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %row.event.id, "Pushed but could not mark synced: {}", e);
                false
            }
        }
    }

    /// Reduced pass scoped to one id: its pending deletion, then its pending
    /// write. Used by the fire-and-forget path behind single-event writes.
    pub async fn push_single(&self, id: &str) {
        match self.store.list_unsynced_tombstones() {
            Ok(tombstones) => {
                for tombstone in tombstones.iter().filter(|t| t.id == id) {
                    self.push_deletion(tombstone).await;
                }
            }
            Err(e) => warn!(id, "Cannot read tombstones for push: {}", e),
        }

        match self.store.get(id) {
            Ok(Some(row)) if row.sync_status == SyncStatus::Pending => {
                self.push_row(&row).await;
            }
            Ok(_) => {}
            Err(e) => warn!(id, "Cannot read row for push: {}", e),
        }
    }

    /// Cached events in the inclusive range, optionally per calendar.
    ///
    /// Never fails: an unreachable cache degrades to a single placeholder
    /// event so callers always get a list. A stale cache additionally
    /// triggers a background refresh when a runtime is available.
    pub fn get_events(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        calendar_name: Option<&str>,
    ) -> Vec<Event> {
        match self.store.query(start, end, calendar_name) {
            Ok(events) => {
                self.maybe_spawn_refresh();
                events
            }
            Err(e) => {
                warn!("Cache read failed, serving placeholder: {}", e);
                vec![placeholder_event()]
            }
        }
    }

    /// Write a new event into the local cache and schedule a best-effort
    /// push. The caller's result reflects only the local write.
    /// An empty id gets a generated one; the effective id is returned either
    /// way.
    pub fn create_event(&self, calendar_name: &str, mut event: Event) -> CalSyncResult<String> {
        if event.id.is_empty() {
            event.id = Event::generate_id();
        }
        let row = self.pending_row(calendar_name, event)?;
        let id = row.event.id.clone();
        self.store.upsert_many(&[row], false)?;
        self.spawn_push(id.clone());
        Ok(id)
    }

    /// Like [`create_event`](Self::create_event), with the sequence number
    /// bumped past the cached copy's.
    pub fn update_event(&self, calendar_name: &str, mut event: Event) -> CalSyncResult<()> {
        let prior_sequence = self
            .store
            .get(&event.id)?
            .and_then(|row| row.event.sequence)
            .unwrap_or(0);
        event.sequence = Some(prior_sequence + 1);

        let row = self.pending_row(calendar_name, event)?;
        let id = row.event.id.clone();
        self.store.upsert_many(&[row], false)?;
        self.spawn_push(id);
        Ok(())
    }

    /// Remove an event locally (row plus tombstone in one transaction) and
    /// schedule a best-effort deletion push. Returns whether a row existed.
    pub fn delete_event(&self, id: &str) -> CalSyncResult<bool> {
        let existed = self.store.delete(id)?;
        self.spawn_push(id.to_string());
        Ok(existed)
    }

    /// The configured calendars with their cached event counts. A calendar
    /// whose last pull failed, or whose count cannot be read, reports -1.
    pub fn list_calendars(&self) -> Vec<CalendarSummary> {
        let counts = self.counts();
        self.directory
            .iter()
            .map(|collection| {
                let count = match counts.get(&collection.name) {
                    Some(count) => *count,
                    None => self.store.count(Some(&collection.name)).unwrap_or(-1),
                };
                CalendarSummary {
                    name: collection.name.clone(),
                    display_name: collection.display_name.clone(),
                    count,
                }
            })
            .collect()
    }

    /// When the cache was last confirmed against the remote; absent until a
    /// first successful pull or push lands.
    pub fn last_synced_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.store.last_synced_at().ok().flatten()
    }

    /// Whether the cache is due for a refresh.
    pub fn is_stale(&self) -> bool {
        match self.last_synced_at() {
            Some(at) => at < Utc::now() - self.sync_interval,
            None => true,
        }
    }

    fn pending_row(&self, calendar_name: &str, event: Event) -> CalSyncResult<CachedEvent> {
        let collection = self
            .directory
            .get(calendar_name)
            .ok_or_else(|| crate::error::CalSyncError::CalendarNotFound(calendar_name.into()))?;
        let caldav_filename = filename_for_id(&event.id);
        Ok(CachedEvent {
            event,
            calendar_name: collection.name.clone(),
            calendar_path: collection.path.clone(),
            caldav_filename,
            sync_status: SyncStatus::Pending,
            local_modified: Utc::now(),
            synced_at: None,
        })
    }

    fn spawn_push(&self, id: String) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let engine = self.clone();
            handle.spawn(async move { engine.push_single(&id).await });
        }
    }

    fn maybe_spawn_refresh(&self) {
        if !self.is_stale() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let engine = self.clone();
            handle.spawn(async move {
                engine.force_sync().await;
            });
        }
    }

    fn counts(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.calendar_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// The synthetic event served when the cache cannot be read at all.
fn placeholder_event() -> Event {
    Event::new(
        "calsync-no-data",
        "No events available (cache unreachable)",
        EventTime::Date(Utc::now().date_naive()),
    )
}
