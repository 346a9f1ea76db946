//! Reconciliation engine and its background scheduler.

pub mod engine;
pub mod scheduler;

pub use engine::{CalendarSummary, SyncEngine, SyncReport};
pub use scheduler::{SchedulerHandle, SyncScheduler};
