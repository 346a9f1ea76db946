//! HTTP-backed CalDAV transport.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use tracing::debug;

use crate::caldav::{CalDavTransport, StatusOutcome};
use crate::config::SyncConfig;
use crate::error::{CalSyncError, CalSyncResult};

/// Transport over plain HTTP with per-call basic auth. Single-attempt: no
/// retries, no caller-visible session state.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
            base_url: config.hostname.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl CalDavTransport for HttpTransport {
    async fn query(
        &self,
        path: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> CalSyncResult<String> {
        let method = Method::from_bytes(b"REPORT")
            .map_err(|e| CalSyncError::Protocol(e.to_string()))?;
        let body = calendar_query_body(start, end);

        debug!(path, "CalDAV REPORT");
        let response = self
            .client
            .request(method, self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", "1")
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalSyncError::Transport {
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    async fn put(&self, path: &str, body: &str) -> CalSyncResult<StatusOutcome> {
        debug!(path, "CalDAV PUT");
        let response = self
            .client
            .put(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "text/calendar; charset=utf-8")
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status().as_u16();
        Ok(StatusOutcome {
            success: matches!(status, 200 | 201 | 204),
            status,
        })
    }

    async fn delete(&self, path: &str) -> CalSyncResult<StatusOutcome> {
        debug!(path, "CalDAV DELETE");
        let response = self
            .client
            .delete(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        // 404 counts as success: the post-condition (absence) already holds.
        let status = response.status().as_u16();
        Ok(StatusOutcome {
            success: matches!(status, 200 | 204 | 404),
            status,
        })
    }
}

/// Build the calendar-query REPORT body. Bounded sides become attributes of
/// the time-range filter; with both sides absent the time filter is omitted
/// entirely.
fn calendar_query_body(start: Option<NaiveDate>, end: Option<NaiveDate>) -> String {
    let time_range = match (start, end) {
        (None, None) => String::new(),
        (start, end) => {
            let mut attrs = String::new();
            if let Some(s) = start {
                attrs.push_str(&format!(r#" start="{}T000000Z""#, s.format("%Y%m%d")));
            }
            if let Some(e) = end {
                attrs.push_str(&format!(r#" end="{}T235959Z""#, e.format("%Y%m%d")));
            }
            format!("<C:time-range{}/>", attrs)
        }
    };

    format!(
        r#"<C:calendar-query xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
    <prop>
        <getetag/>
        <C:calendar-data/>
    </prop>
    <C:filter>
        <C:comp-filter name="VCALENDAR">
            <C:comp-filter name="VEVENT">
                {}
            </C:comp-filter>
        </C:comp-filter>
    </C:filter>
</C:calendar-query>"#,
        time_range
    )
}
