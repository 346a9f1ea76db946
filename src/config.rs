//! Injected configuration values.
//!
//! The engine does not load configuration itself; credentials, the calendar
//! directory and timing knobs are handed over as opaque values at
//! construction time.

use serde::{Deserialize, Serialize};

use crate::directory::CalendarEntry;

/// Everything the sync engine needs to reach and schedule one CalDAV account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub username: String,
    pub password: String,
    /// Scheme + host, e.g. "https://dav.example.com".
    pub hostname: String,
    /// Base path under which all calendar collections live.
    pub collections_base_path: String,
    /// Logical calendars, in display order.
    pub calendars: Vec<CalendarEntry>,
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u64,
    /// Cache rows with a start older than this are pruned.
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: i64,
    /// Synced tombstones older than this are pruned.
    #[serde(default = "default_tombstone_retention_days")]
    pub tombstone_retention_days: i64,
}

fn default_sync_interval_minutes() -> u64 {
    15
}

fn default_event_retention_days() -> i64 {
    180
}

fn default_tombstone_retention_days() -> i64 {
    30
}

impl SyncConfig {
    pub fn sync_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.sync_interval_minutes as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_omitted() {
        let config: SyncConfig = serde_json::from_str(
            r#"{
                "username": "user",
                "password": "secret",
                "hostname": "https://dav.example.com",
                "collections_base_path": "/calendars/user",
                "calendars": []
            }"#,
        )
        .unwrap();

        assert_eq!(config.sync_interval_minutes, 15);
        assert_eq!(config.event_retention_days, 180);
        assert_eq!(config.tombstone_retention_days, 30);
    }
}
