//! ICS payload parsing using the icalendar crate's parser.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use icalendar::{
    DatePerhapsTime,
    parser::{Component, read_calendar, unfold},
};
use tracing::warn;

use crate::event::{Event, EventStatus, EventTime, GeoPoint, Transparency, Visibility};
use crate::ics::unescape_text;

/// Parse ICS content into events, one per embedded VEVENT.
///
/// A VEVENT that fails to decode is logged and skipped so that a single
/// malformed sub-document never aborts its siblings.
pub fn parse_events(content: &str) -> Vec<Event> {
    let unfolded = unfold(content);
    let calendar = match read_calendar(&unfolded) {
        Ok(cal) => cal,
        Err(e) => {
            warn!("Skipping unparseable ICS payload: {}", e);
            return Vec::new();
        }
    };

    calendar
        .components
        .iter()
        .filter(|c| c.name == "VEVENT")
        .filter_map(|vevent| {
            let parsed = parse_vevent(vevent);
            if parsed.is_none() {
                warn!("Skipping VEVENT without UID or DTSTART");
            }
            parsed
        })
        .collect()
}

/// Decode one VEVENT. Requires UID and DTSTART; everything else is optional
/// and stays absent when the remote side omits it.
fn parse_vevent(vevent: &Component) -> Option<Event> {
    let uid = vevent.find_prop("UID")?.val.to_string();
    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| unescape_text(p.val.as_ref()))
        .unwrap_or_else(|| "(No title)".to_string());

    let (start, start_tz) =
        to_event_time(DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?);
    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(|dpt| to_event_time(dpt).0);
    let (start, end) = normalize_all_day(start, end);

    let description = vevent
        .find_prop("DESCRIPTION")
        .map(|p| unescape_text(p.val.as_ref()));
    let location = vevent
        .find_prop("LOCATION")
        .map(|p| unescape_text(p.val.as_ref()));

    let organizer = vevent
        .find_prop("ORGANIZER")
        .map(|p| strip_mailto(p.val.as_ref()));
    let attendees: Vec<String> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "ATTENDEE")
        .map(|p| strip_mailto(p.val.as_ref()))
        .collect();

    let categories: Vec<String> = vevent
        .find_prop("CATEGORIES")
        .map(|p| crate::ics::split_escaped(p.val.as_ref(), ','))
        .unwrap_or_default();

    let priority = vevent
        .find_prop("PRIORITY")
        .and_then(|p| p.val.as_ref().parse().ok());

    let status = vevent
        .find_prop("STATUS")
        .map(|p| EventStatus::from_ics_str(p.val.as_ref()))
        .unwrap_or(EventStatus::Confirmed);

    let visibility = vevent
        .find_prop("CLASS")
        .map(|p| Visibility::from_ics_str(p.val.as_ref()))
        .unwrap_or(Visibility::Public);

    let transparency = vevent
        .find_prop("TRANSP")
        .map(|p| {
            if p.val == "TRANSPARENT" {
                Transparency::Transparent
            } else {
                Transparency::Opaque
            }
        })
        .unwrap_or(Transparency::Opaque);

    let rrule = vevent.find_prop("RRULE").map(|p| p.val.to_string());
    let geo = vevent.find_prop("GEO").and_then(|p| parse_geo(p.val.as_ref()));
    let url = vevent.find_prop("URL").map(|p| p.val.to_string());
    let attachments: Vec<String> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "ATTACH")
        .map(|p| p.val.to_string())
        .collect();

    let sequence = vevent
        .find_prop("SEQUENCE")
        .and_then(|p| p.val.as_ref().parse().ok());
    let created = vevent
        .find_prop("CREATED")
        .and_then(|p| parse_utc_timestamp(p.val.as_ref()));
    let last_modified = vevent
        .find_prop("LAST-MODIFIED")
        .and_then(|p| parse_utc_timestamp(p.val.as_ref()));

    // Timezone survives as a display-only attribute: TZID from DTSTART, or
    // the explicit side property written by our encoder.
    let timezone = start_tz.or_else(|| {
        vevent
            .find_prop("X-TIMEZONE")
            .map(|p| p.val.to_string())
    });

    let is_vacation = vevent
        .find_prop("X-IS-VACATION")
        .map(|p| p.val == "TRUE")
        .unwrap_or(false);

    Some(Event {
        id: uid,
        summary,
        start,
        end,
        description,
        location,
        organizer,
        attendees,
        categories,
        priority,
        status,
        visibility,
        transparency,
        rrule,
        geo,
        url,
        attachments,
        timezone,
        sequence,
        created,
        last_modified,
        is_vacation,
    })
}

/// Convert icalendar's DatePerhapsTime to our EventTime plus the source
/// timezone name, normalizing every timed value to UTC.
fn to_event_time(dpt: DatePerhapsTime) -> (EventTime, Option<String>) {
    match dpt {
        DatePerhapsTime::Date(d) => (EventTime::Date(d), None),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => (EventTime::DateTime(dt), None),
            icalendar::CalendarDateTime::Floating(naive) => {
                (EventTime::DateTime(naive.and_utc()), None)
            }
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                let utc = zoned_to_utc(&date_time, &tzid);
                (EventTime::DateTime(utc), Some(tzid))
            }
        },
    }
}

fn zoned_to_utc(naive: &NaiveDateTime, tzid: &str) -> DateTime<Utc> {
    match tzid.parse::<chrono_tz::Tz>() {
        Ok(tz) => tz
            .from_local_datetime(naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
        Err(_) => naive.and_utc(),
    }
}

/// An event whose start and end are timed values exactly 24 hours apart is an
/// all-day event in disguise; normalize it to date-only form.
fn normalize_all_day(start: EventTime, end: Option<EventTime>) -> (EventTime, Option<EventTime>) {
    if let (EventTime::DateTime(s), Some(EventTime::DateTime(e))) = (&start, &end) {
        if *e - *s == chrono::Duration::hours(24) {
            return (
                EventTime::Date(s.date_naive()),
                Some(EventTime::Date(e.date_naive())),
            );
        }
    }
    (start, end)
}

fn strip_mailto(value: &str) -> String {
    value.strip_prefix("mailto:").unwrap_or(value).to_string()
}

fn parse_geo(value: &str) -> Option<GeoPoint> {
    let (lat, lon) = value.split_once(';')?;
    Some(GeoPoint {
        lat: lat.trim().parse().ok()?,
        lon: lon.trim().parse().ok()?,
    })
}

fn parse_utc_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timed_event() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-1\r\n\
SUMMARY:Standup\r\n\
DTSTART:20250820T090000Z\r\n\
DTEND:20250820T091500Z\r\n\
STATUS:TENTATIVE\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_events(ics);
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.summary, "Standup");
        assert_eq!(event.status, EventStatus::Tentative);
        assert_eq!(
            event.start,
            EventTime::DateTime(Utc.with_ymd_and_hms(2025, 8, 20, 9, 0, 0).unwrap())
        );
        assert_eq!(event.duration_hm(), Some((0, 15)));
    }

    #[test]
    fn test_parse_all_day_event_from_value_date() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-2\r\n\
SUMMARY:Holiday\r\n\
DTSTART;VALUE=DATE:20250820\r\n\
DTEND;VALUE=DATE:20250821\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_events(ics);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_all_day());
    }

    #[test]
    fn test_exact_24_hour_event_becomes_all_day() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-3\r\n\
SUMMARY:Offsite\r\n\
DTSTART:20250820T000000Z\r\n\
DTEND:20250821T000000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_events(ics);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_all_day());
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-4\r\n\
SUMMARY:Bare\r\n\
DTSTART:20250820T090000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_events(ics);
        let event = &events[0];
        assert!(event.description.is_none());
        assert!(event.location.is_none());
        assert!(event.end.is_none());
        assert!(event.sequence.is_none());
    }

    #[test]
    fn test_bad_vevent_does_not_abort_siblings() {
        // Second VEVENT has no UID and must be skipped, not fatal.
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:good-1\r\n\
SUMMARY:Good\r\n\
DTSTART:20250820T090000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:No identity\r\n\
DTSTART:20250820T100000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:good-2\r\n\
SUMMARY:Also good\r\n\
DTSTART:20250820T110000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_events(ics);
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["good-1", "good-2"]);
    }

    #[test]
    fn test_escaped_text_is_unescaped() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-5\r\n\
SUMMARY:Lunch\\; bring chips\\, salsa\r\n\
DESCRIPTION:line1\\nline2\r\n\
DTSTART:20250820T120000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_events(ics);
        let event = &events[0];
        assert_eq!(event.summary, "Lunch; bring chips, salsa");
        assert_eq!(event.description.as_deref(), Some("line1\nline2"));
    }

    #[test]
    fn test_tzid_preserved_and_converted_to_utc() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-6\r\n\
SUMMARY:NY Meeting\r\n\
DTSTART;TZID=America/New_York:20250120T100000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_events(ics);
        let event = &events[0];
        assert_eq!(event.timezone.as_deref(), Some("America/New_York"));
        // EST is UTC-5 in January.
        assert_eq!(
            event.start,
            EventTime::DateTime(Utc.with_ymd_and_hms(2025, 1, 20, 15, 0, 0).unwrap())
        );
    }
}
