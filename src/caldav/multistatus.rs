//! Parsing of CalDAV multistatus responses.

use crate::error::{CalSyncError, CalSyncResult};

/// A fetched calendar resource with its ICS data.
#[derive(Debug, Clone)]
pub struct RemoteResource {
    pub href: String,
    pub data: String,
}

/// Parse calendar resources from a CalDAV multistatus response.
///
/// Responses without calendar data (collection entries, failed propstats)
/// are skipped.
pub fn parse_resources(body: &str) -> CalSyncResult<Vec<RemoteResource>> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| CalSyncError::Protocol(format!("Invalid multistatus XML: {}", e)))?;
    let root = doc.root_element();

    let mut resources = Vec::new();

    for response in root
        .descendants()
        .filter(|n| n.tag_name().name() == "response")
    {
        let href = response
            .descendants()
            .find(|n| n.tag_name().name() == "href")
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string());

        let Some(href) = href else { continue };

        let data = response
            .descendants()
            .find(|n| n.tag_name().name() == "calendar-data")
            .and_then(|n| n.text())
            .map(|s| s.to_string());

        if let Some(data) = data {
            resources.push(RemoteResource { href, data });
        }
    }

    Ok(resources)
}

/// Extract the resource filename from a multistatus href.
/// "/calendars/u/work/evt-1.ics" becomes "evt-1.ics".
pub fn filename_from_href(href: &str) -> Option<String> {
    let name = href.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTISTATUS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<multistatus xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <response>
    <href>/calendars/user/work/evt-1.ics</href>
    <propstat>
      <prop>
        <C:calendar-data>BEGIN:VCALENDAR
BEGIN:VEVENT
UID:evt-1
DTSTART:20250820T090000Z
END:VEVENT
END:VCALENDAR</C:calendar-data>
      </prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
  </response>
  <response>
    <href>/calendars/user/work/</href>
    <propstat>
      <prop/>
      <status>HTTP/1.1 404 Not Found</status>
    </propstat>
  </response>
</multistatus>"#;

    #[test]
    fn test_parse_resources_skips_entries_without_data() {
        let resources = parse_resources(MULTISTATUS).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].href, "/calendars/user/work/evt-1.ics");
        assert!(resources[0].data.contains("UID:evt-1"));
    }

    #[test]
    fn test_parse_resources_rejects_bad_xml() {
        assert!(parse_resources("not xml at all").is_err());
    }

    #[test]
    fn test_filename_from_href() {
        assert_eq!(
            filename_from_href("/calendars/user/work/evt-1.ics").as_deref(),
            Some("evt-1.ics")
        );
        assert!(filename_from_href("/").is_none());
    }
}
