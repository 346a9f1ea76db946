//! Collection-scoped remote operations across the configured calendars.
//!
//! Composes the transport, the codec and the calendar directory. Stateless:
//! nothing is persisted here.

use std::sync::Arc;

use tracing::warn;

use crate::caldav::{CalDavTransport, multistatus};
use crate::directory::CalendarDirectory;
use crate::error::{CalSyncError, CalSyncResult};
use crate::event::Event;
use crate::ics::{generate_ics, parse_events};

/// Remote resource filename for an event id. Deterministic, so repeated
/// creates for the same id are idempotent upserts.
pub fn filename_for_id(id: &str) -> String {
    format!("{}.ics", urlencoding::encode(id))
}

pub struct CalendarGateway {
    transport: Arc<dyn CalDavTransport>,
    directory: CalendarDirectory,
}

impl CalendarGateway {
    pub fn new(transport: Arc<dyn CalDavTransport>, directory: CalendarDirectory) -> Self {
        CalendarGateway {
            transport,
            directory,
        }
    }

    /// Fetch every event in a calendar, paired with its remote filename.
    ///
    /// Falls back to `<id>.ics` when the response href yields no filename.
    pub async fn fetch_all(&self, calendar_name: &str) -> CalSyncResult<Vec<(Event, String)>> {
        let collection = self
            .directory
            .get(calendar_name)
            .ok_or_else(|| CalSyncError::CalendarNotFound(calendar_name.to_string()))?;

        let body = self.transport.query(&collection.path, None, None).await?;
        let resources = multistatus::parse_resources(&body)?;

        let mut events = Vec::new();
        for resource in resources {
            for event in parse_events(&resource.data) {
                let filename = multistatus::filename_from_href(&resource.href)
                    .unwrap_or_else(|| filename_for_id(&event.id));
                events.push((event, filename));
            }
        }

        Ok(events)
    }

    /// PUT an event into a calendar at its id-derived filename.
    pub async fn create(&self, calendar_name: &str, event: &Event) -> bool {
        let Some(collection) = self.directory.get(calendar_name) else {
            warn!(calendar = calendar_name, "Unknown calendar on create");
            return false;
        };

        let ics = match generate_ics(event) {
            Ok(ics) => ics,
            Err(e) => {
                warn!(id = %event.id, "Failed to encode event: {}", e);
                return false;
            }
        };

        let path = format!("{}{}", collection.path, filename_for_id(&event.id));
        match self.transport.put(&path, &ics).await {
            Ok(outcome) => {
                if !outcome.success {
                    warn!(path, status = outcome.status, "Remote PUT rejected");
                }
                outcome.success
            }
            Err(e) => {
                warn!(path, "Remote PUT failed: {}", e);
                false
            }
        }
    }

    /// Same idempotent-PUT contract as [`create`](Self::create); the protocol
    /// does not distinguish create from update.
    pub async fn update(&self, calendar_name: &str, event: &Event) -> bool {
        self.create(calendar_name, event).await
    }

    /// DELETE a specific remote filename. The filename is used rather than
    /// the id because the two are not guaranteed to match.
    pub async fn delete(&self, calendar_name: &str, filename: &str) -> bool {
        let Some(collection) = self.directory.get(calendar_name) else {
            warn!(calendar = calendar_name, "Unknown calendar on delete");
            return false;
        };

        let path = format!("{}{}", collection.path, filename);
        match self.transport.delete(&path).await {
            Ok(outcome) => {
                if !outcome.success {
                    warn!(path, status = outcome.status, "Remote DELETE rejected");
                }
                outcome.success
            }
            Err(e) => {
                warn!(path, "Remote DELETE failed: {}", e);
                false
            }
        }
    }
}
