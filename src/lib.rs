//! Local cache and sync engine for CalDAV calendar collections.
//!
//! The crate keeps a SQLite mirror of one CalDAV account's calendars and
//! reconciles it with the remote in fixed-order passes:
//! - `event` and `ics` define the canonical event type and its iCalendar
//!   codec
//! - `caldav` speaks the wire protocol (REPORT/PUT/DELETE) behind a
//!   transport trait
//! - `gateway` scopes remote operations to named calendars
//! - `store` is the local cache, including deletion tombstones
//! - `sync` runs the reconciliation passes and the background timer
//!
//! Reads and single-event writes go against the cache and never block on the
//! network; a scheduler (or any caller via [`SyncEngine::force_sync`]) moves
//! state between cache and remote.

pub mod caldav;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod gateway;
pub mod ics;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::SyncConfig;
pub use directory::{CalendarDirectory, CalendarEntry};
pub use error::{CalSyncError, CalSyncResult};
pub use event::{Event, EventStatus, EventTime, GeoPoint, Transparency, Visibility};
pub use gateway::CalendarGateway;
pub use store::CacheStore;
pub use sync::{CalendarSummary, SchedulerHandle, SyncEngine, SyncReport, SyncScheduler};
