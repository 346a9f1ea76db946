//! ICS generation.

use icalendar::{Calendar, Component, Property, ValueType};

use crate::error::CalSyncResult;
use crate::event::{Event, EventStatus, EventTime, Transparency, Visibility};
use crate::ics::escape_text;

/// Generate .ics content for one event.
///
/// Timed values are written in absolute UTC with seconds precision and a
/// trailing Z. All-day events get date-only values, with DTEND defaulting to
/// the day after the start unless an explicit multi-day end is present.
pub fn generate_ics(event: &Event) -> CalSyncResult<String> {
    let mut cal = Calendar::new();

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.id);
    ics_event.add_property("SUMMARY", escape_text(&event.summary).as_str());

    // DTSTAMP - required by RFC 5545
    let dtstamp = event
        .last_modified
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y%m%dT%H%M%SZ")
        .to_string();
    ics_event.add_property("DTSTAMP", dtstamp.as_str());

    add_start_end(&mut ics_event, event);

    if let Some(ref desc) = event.description {
        ics_event.add_property("DESCRIPTION", escape_text(desc).as_str());
    }
    if let Some(ref loc) = event.location {
        ics_event.add_property("LOCATION", escape_text(loc).as_str());
    }

    // STATUS - only emit if not CONFIRMED (the implied default)
    if event.status != EventStatus::Confirmed {
        ics_event.add_property("STATUS", event.status.as_ics_str());
    }

    // CLASS - only emit if not PUBLIC (the implied default)
    if event.visibility != Visibility::Public {
        ics_event.add_property("CLASS", event.visibility.as_ics_str());
    }

    // TRANSP - only emit if TRANSPARENT (OPAQUE is the default)
    if event.transparency == Transparency::Transparent {
        ics_event.add_property("TRANSP", "TRANSPARENT");
    }

    if let Some(ref org) = event.organizer {
        ics_event.add_property("ORGANIZER", format!("mailto:{}", org).as_str());
    }
    for attendee in &event.attendees {
        let prop = Property::new("ATTENDEE", format!("mailto:{}", attendee).as_str());
        ics_event.append_multi_property(prop);
    }

    if !event.categories.is_empty() {
        let joined = event
            .categories
            .iter()
            .map(|c| escape_text(c))
            .collect::<Vec<_>>()
            .join(",");
        ics_event.add_property("CATEGORIES", joined.as_str());
    }

    if let Some(priority) = event.priority {
        ics_event.add_property("PRIORITY", priority.to_string().as_str());
    }
    if let Some(ref rrule) = event.rrule {
        ics_event.add_property("RRULE", rrule.as_str());
    }
    if let Some(ref geo) = event.geo {
        ics_event.add_property("GEO", format!("{};{}", geo.lat, geo.lon).as_str());
    }
    if let Some(ref url) = event.url {
        ics_event.add_property("URL", url.as_str());
    }
    for attachment in &event.attachments {
        let prop = Property::new("ATTACH", attachment.as_str());
        ics_event.append_multi_property(prop);
    }

    if let Some(seq) = event.sequence {
        ics_event.add_property("SEQUENCE", seq.to_string().as_str());
    }
    if let Some(created) = event.created {
        ics_event.add_property("CREATED", created.format("%Y%m%dT%H%M%SZ").to_string().as_str());
    }
    if let Some(updated) = event.last_modified {
        ics_event.add_property(
            "LAST-MODIFIED",
            updated.format("%Y%m%dT%H%M%SZ").to_string().as_str(),
        );
    }

    // Source timezone is display-only; it rides along as a side property and
    // is never used to re-derive the encoded instants.
    if let Some(ref tz) = event.timezone {
        ics_event.add_property("X-TIMEZONE", tz.as_str());
    }
    if event.is_vacation {
        ics_event.add_property("X-IS-VACATION", "TRUE");
    }

    let ics_event = ics_event.done();
    cal.push(ics_event);
    let cal = cal.done();

    Ok(strip_ics_bloat(&cal.to_string()))
}

/// Clean up ICS output from the icalendar crate:
/// - Replace PRODID with our own
/// - Remove CALSCALE:GREGORIAN (it's the default)
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:CALSYNC\r\n");
            continue;
        }
        if line == "CALSCALE:GREGORIAN" {
            continue;
        }
        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}

fn add_start_end(ics_event: &mut icalendar::Event, event: &Event) {
    match &event.start {
        EventTime::Date(d) => {
            add_date_property(ics_event, "DTSTART", *d);
            // All-day DTEND defaults to the day after the start unless an
            // explicit multi-day end is supplied.
            let end_day = match &event.end {
                Some(EventTime::Date(e)) if *e > *d => *e,
                Some(EventTime::DateTime(e)) if e.date_naive() > *d => e.date_naive(),
                _ => d.succ_opt().unwrap_or(*d),
            };
            add_date_property(ics_event, "DTEND", end_day);
        }
        EventTime::DateTime(start) => {
            ics_event.add_property("DTSTART", start.format("%Y%m%dT%H%M%SZ").to_string().as_str());
            if let Some(end) = &event.end {
                let end_utc = end.to_utc();
                ics_event.add_property("DTEND", end_utc.format("%Y%m%dT%H%M%SZ").to_string().as_str());
            }
        }
    }
}

fn add_date_property(ics_event: &mut icalendar::Event, name: &str, day: chrono::NaiveDate) {
    let mut prop = Property::new(name, day.format("%Y%m%d").to_string().as_str());
    prop.append_parameter(ValueType::Date);
    ics_event.append_property(prop);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::GeoPoint;
    use crate::ics::parse_events;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn timed_event() -> Event {
        let mut event = Event::new(
            "evt-timed@calsync",
            "Team standup",
            EventTime::DateTime(Utc.with_ymd_and_hms(2025, 8, 20, 9, 0, 0).unwrap()),
        );
        event.end = Some(EventTime::DateTime(
            Utc.with_ymd_and_hms(2025, 8, 20, 9, 30, 0).unwrap(),
        ));
        event.description = Some("Agenda: status, blockers".to_string());
        event.location = Some("Room 2; east wing".to_string());
        event.status = EventStatus::Tentative;
        event.timezone = Some("Europe/Berlin".to_string());
        event
    }

    #[test]
    fn test_timed_event_encoded_in_utc_with_z() {
        let ics = generate_ics(&timed_event()).unwrap();

        assert!(ics.contains("DTSTART:20250820T090000Z"), "ICS:\n{}", ics);
        assert!(ics.contains("DTEND:20250820T093000Z"), "ICS:\n{}", ics);
    }

    #[test]
    fn test_all_day_event_defaults_end_to_next_day() {
        let event = Event::new(
            "evt-allday@calsync",
            "Holiday",
            EventTime::Date(NaiveDate::from_ymd_opt(2025, 8, 20).unwrap()),
        );

        let ics = generate_ics(&event).unwrap();

        assert!(ics.contains("DTSTART;VALUE=DATE:20250820"), "ICS:\n{}", ics);
        assert!(ics.contains("DTEND;VALUE=DATE:20250821"), "ICS:\n{}", ics);
    }

    #[test]
    fn test_all_day_event_keeps_explicit_multi_day_end() {
        let mut event = Event::new(
            "evt-multiday@calsync",
            "Conference",
            EventTime::Date(NaiveDate::from_ymd_opt(2025, 8, 20).unwrap()),
        );
        event.end = Some(EventTime::Date(NaiveDate::from_ymd_opt(2025, 8, 23).unwrap()));

        let ics = generate_ics(&event).unwrap();

        assert!(ics.contains("DTEND;VALUE=DATE:20250823"), "ICS:\n{}", ics);
    }

    #[test]
    fn test_roundtrip_timed_event() {
        let event = timed_event();
        let ics = generate_ics(&event).unwrap();
        let parsed = parse_events(&ics);
        assert_eq!(parsed.len(), 1);

        let back = &parsed[0];
        assert_eq!(back.id, event.id);
        assert_eq!(back.summary, event.summary);
        assert_eq!(back.start, event.start);
        assert_eq!(back.end, event.end);
        assert_eq!(back.description, event.description);
        assert_eq!(back.location, event.location);
        assert_eq!(back.status, event.status);
        assert_eq!(back.timezone, event.timezone);
    }

    #[test]
    fn test_roundtrip_all_day_event() {
        let mut event = Event::new(
            "evt-allday@calsync",
            "Holiday",
            EventTime::Date(NaiveDate::from_ymd_opt(2025, 8, 20).unwrap()),
        );
        event.is_vacation = true;

        let ics = generate_ics(&event).unwrap();
        let parsed = parse_events(&ics);
        assert_eq!(parsed.len(), 1);

        let back = &parsed[0];
        assert!(back.is_all_day());
        assert_eq!(back.start, event.start);
        assert_eq!(back.summary, event.summary);
        assert!(back.is_vacation);
    }

    #[test]
    fn test_roundtrip_structured_fields() {
        let mut event = timed_event();
        event.organizer = Some("boss@example.com".to_string());
        event.attendees = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        event.categories = vec!["work".to_string(), "sync, weekly".to_string()];
        event.priority = Some(5);
        event.geo = Some(GeoPoint { lat: 52.52, lon: 13.405 });
        event.sequence = Some(3);

        let ics = generate_ics(&event).unwrap();
        let parsed = parse_events(&ics);
        let back = &parsed[0];

        assert_eq!(back.organizer, event.organizer);
        assert_eq!(back.attendees, event.attendees);
        assert_eq!(back.categories, event.categories);
        assert_eq!(back.priority, event.priority);
        assert_eq!(back.geo, event.geo);
        assert_eq!(back.sequence, event.sequence);
    }
}
