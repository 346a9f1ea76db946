//! CalDAV protocol transport.
//!
//! Three stateless operations against one remote collection path at a time:
//! a range-filtered calendar-query REPORT, an idempotent PUT upsert, and a
//! DELETE. Authentication is attached per call; retry policy belongs to the
//! reconciler, not here.

pub mod multistatus;
pub mod transport;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::CalSyncResult;

pub use multistatus::{RemoteResource, parse_resources};
pub use transport::HttpTransport;

/// Outcome of a write call: whether the post-condition holds, plus the raw
/// status for logging.
#[derive(Debug, Clone, Copy)]
pub struct StatusOutcome {
    pub success: bool,
    pub status: u16,
}

/// The seam between the gateway and the wire. Implemented by
/// [`HttpTransport`] in production and by an in-memory fake in tests.
#[async_trait]
pub trait CalDavTransport: Send + Sync {
    /// Issue a calendar-query REPORT against a collection path. An absent
    /// start or end leaves that side of the range unbounded; both absent
    /// means an unbounded query. Returns the full multistatus body on 2xx.
    async fn query(
        &self,
        path: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> CalSyncResult<String>;

    /// PUT an ICS body at a resource path. Success on 200/201/204.
    async fn put(&self, path: &str, body: &str) -> CalSyncResult<StatusOutcome>;

    /// DELETE a resource path. Success on 200/204, and on 404: deleting
    /// something already gone is not a failure.
    async fn delete(&self, path: &str) -> CalSyncResult<StatusOutcome>;
}
