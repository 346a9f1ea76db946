//! In-memory transport fake shared by gateway, reconciler and scheduler
//! tests. Stores resources as `full path -> ICS body` and answers queries
//! with a minimal multistatus document so the real parsing path is
//! exercised.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::caldav::{CalDavTransport, StatusOutcome};
use crate::error::{CalSyncError, CalSyncResult};

pub(crate) struct FakeTransport {
    resources: Mutex<BTreeMap<String, String>>,
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    /// Collection paths whose query fails with a 500.
    failing_queries: Mutex<HashSet<String>>,
    /// Forced DELETE status per path; the resource is left untouched.
    forced_delete_status: Mutex<HashMap<String, u16>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            resources: Mutex::new(BTreeMap::new()),
            puts: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            failing_queries: Mutex::new(HashSet::new()),
            forced_delete_status: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert_resource(&self, path: &str, ics: &str) {
        self.resources
            .lock()
            .unwrap()
            .insert(path.to_string(), ics.to_string());
    }

    pub fn has_resource(&self, path: &str) -> bool {
        self.resources.lock().unwrap().contains_key(path)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn puts_under(&self, prefix: &str) -> usize {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with(prefix))
            .count()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }

    pub fn fail_queries_for(&self, collection_path: &str) {
        self.failing_queries
            .lock()
            .unwrap()
            .insert(collection_path.to_string());
    }

    /// Make DELETE on a path answer with the given status while leaving the
    /// stored resource in place.
    pub fn force_delete_status(&self, path: &str, status: u16) {
        self.forced_delete_status
            .lock()
            .unwrap()
            .insert(path.to_string(), status);
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[async_trait]
impl CalDavTransport for FakeTransport {
    async fn query(
        &self,
        path: &str,
        _start: Option<NaiveDate>,
        _end: Option<NaiveDate>,
    ) -> CalSyncResult<String> {
        if self.failing_queries.lock().unwrap().contains(path) {
            return Err(CalSyncError::Transport { status: 500 });
        }

        let mut body = String::from(
            r#"<?xml version="1.0" encoding="utf-8"?>
<multistatus xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">"#,
        );
        for (href, ics) in self.resources.lock().unwrap().iter() {
            if !href.starts_with(path) {
                continue;
            }
            body.push_str(&format!(
                "<response><href>{}</href><propstat><prop><C:calendar-data>{}</C:calendar-data></prop>\
                 <status>HTTP/1.1 200 OK</status></propstat></response>",
                xml_escape(href),
                xml_escape(ics)
            ));
        }
        body.push_str("</multistatus>");
        Ok(body)
    }

    async fn put(&self, path: &str, body: &str) -> CalSyncResult<StatusOutcome> {
        self.puts.lock().unwrap().push(path.to_string());
        let replaced = self
            .resources
            .lock()
            .unwrap()
            .insert(path.to_string(), body.to_string())
            .is_some();
        Ok(StatusOutcome {
            success: true,
            status: if replaced { 204 } else { 201 },
        })
    }

    async fn delete(&self, path: &str) -> CalSyncResult<StatusOutcome> {
        self.deletes.lock().unwrap().push(path.to_string());

        if let Some(status) = self.forced_delete_status.lock().unwrap().get(path) {
            return Ok(StatusOutcome {
                success: matches!(*status, 200 | 204 | 404),
                status: *status,
            });
        }

        let removed = self.resources.lock().unwrap().remove(path).is_some();
        Ok(StatusOutcome {
            success: true,
            status: if removed { 204 } else { 404 },
        })
    }
}
