//! Timer-driven background sync.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sync::engine::{SyncEngine, SyncReport};

/// Runs the engine on a recurring timer. Opportunistic callers share the
/// engine's single-flight guard, so a tick that lands during a manual sync
/// is simply dropped.
pub struct SyncScheduler {
    engine: SyncEngine,
    interval: chrono::Duration,
}

/// Cancels the background task on `stop()`.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to stop and wait for it to wind down.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
        info!("Sync scheduler stopped");
    }
}

impl SyncScheduler {
    pub fn new(engine: SyncEngine, interval: chrono::Duration) -> Self {
        SyncScheduler { engine, interval }
    }

    /// Sync now if the cache has never been synced or is older than the
    /// interval; otherwise do nothing.
    pub async fn ensure_fresh(&self) -> Option<SyncReport> {
        if !self.engine.is_stale() {
            debug!("Cache is fresh, skipping sync");
            return None;
        }
        Some(self.engine.force_sync().await)
    }

    /// Spawn the recurring task: one freshness check immediately, then one
    /// per interval until the handle is stopped.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = self
            .interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(15 * 60));

        let task = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Sync scheduler started");
            loop {
                self.ensure_fresh().await;
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        SchedulerHandle { shutdown, task }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::config::SyncConfig;
    use crate::directory::{CalendarDirectory, CalendarEntry};
    use crate::gateway::CalendarGateway;
    use crate::store::CacheStore;
    use crate::testutil::FakeTransport;

    fn engine(transport: Arc<FakeTransport>) -> SyncEngine {
        let config = SyncConfig {
            username: "user".to_string(),
            password: "secret".to_string(),
            hostname: "https://dav.example.com".to_string(),
            collections_base_path: "/calendars/user".to_string(),
            calendars: vec![CalendarEntry {
                name: "work".to_string(),
                path: "work-cal".to_string(),
                display_name: "Work".to_string(),
            }],
            sync_interval_minutes: 15,
            event_retention_days: 180,
            tombstone_retention_days: 30,
        };
        let directory =
            CalendarDirectory::new(&config.collections_base_path, config.calendars.clone());
        let gateway = Arc::new(CalendarGateway::new(transport, directory.clone()));
        let store = Arc::new(CacheStore::in_memory().unwrap());
        SyncEngine::new(
            gateway,
            store,
            directory,
            &config,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn test_ensure_fresh_syncs_a_never_synced_cache() {
        let transport = Arc::new(FakeTransport::new());
        // The event starts in the future so the pass's pruning step leaves
        // the pulled row (and its synced_at) in place.
        let dtstart = (chrono::Utc::now() + chrono::Duration::days(1)).format("%Y%m%dT%H%M%SZ");
        transport.insert_resource(
            "/calendars/user/work-cal/e1.ics",
            &format!(
                "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:e1\nSUMMARY:Standup\nDTSTART:{}\nEND:VEVENT\nEND:VCALENDAR",
                dtstart
            ),
        );
        let scheduler = SyncScheduler::new(engine(transport), chrono::Duration::minutes(15));

        let report = scheduler.ensure_fresh().await;
        assert!(report.is_some());

        // The pull confirmed a row just now, so the cache is fresh.
        let report = scheduler.ensure_fresh().await;
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop_wind_down_cleanly() {
        let transport = Arc::new(FakeTransport::new());
        let scheduler = SyncScheduler::new(engine(transport), chrono::Duration::minutes(15));

        let handle = scheduler.start();
        tokio::task::yield_now().await;
        handle.stop().await;
    }
}
