//! Canonical event types.
//!
//! These types represent calendar events independently of the wire format.
//! The codec in `ics` converts between them and iCalendar text, and the
//! cache store persists them as-is. Optional fields are `Option<T>` so that
//! "absent on the remote side" stays distinguishable from "cleared".

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique id, stable across edits. Sourced from the remote UID
    /// or synthesized for new local events.
    pub id: String,
    pub summary: String,
    pub start: EventTime,
    pub end: Option<EventTime>,
    pub description: Option<String>,
    pub location: Option<String>,
    /// Organizer email (mailto: prefix stripped).
    pub organizer: Option<String>,
    /// Attendee emails (mailto: prefix stripped).
    pub attendees: Vec<String>,
    pub categories: Vec<String>,
    /// 0-9 per RFC 5545; lower is more urgent.
    pub priority: Option<u8>,
    pub status: EventStatus,
    pub visibility: Visibility,
    pub transparency: Transparency,
    /// Opaque RRULE line, never expanded.
    pub rrule: Option<String>,
    pub geo: Option<GeoPoint>,
    pub url: Option<String>,
    pub attachments: Vec<String>,
    /// Source timezone name, kept for display only. Timed values are always
    /// stored and encoded in UTC regardless of this field.
    pub timezone: Option<String>,
    /// Monotonic edit counter (SEQUENCE).
    pub sequence: Option<i64>,
    pub created: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Domain flag carried through sync untouched.
    pub is_vacation: bool,
}

impl Event {
    /// Create an event with the given identity and start, everything else
    /// absent or defaulted.
    pub fn new(id: impl Into<String>, summary: impl Into<String>, start: EventTime) -> Self {
        Event {
            id: id.into(),
            summary: summary.into(),
            start,
            end: None,
            description: None,
            location: None,
            organizer: None,
            attendees: Vec::new(),
            categories: Vec::new(),
            priority: None,
            status: EventStatus::Confirmed,
            visibility: Visibility::Public,
            transparency: Transparency::Opaque,
            rrule: None,
            geo: None,
            url: None,
            attachments: Vec::new(),
            timezone: None,
            sequence: None,
            created: None,
            last_modified: None,
            is_vacation: false,
        }
    }

    /// Synthesize an id for an event created locally, prefixed so remote
    /// UIDs and locally minted ones stay distinguishable in logs.
    pub fn generate_id() -> String {
        format!("local-{}", uuid::Uuid::new_v4())
    }

    /// Whether this is an all-day event (date-only start).
    pub fn is_all_day(&self) -> bool {
        matches!(self.start, EventTime::Date(_))
    }

    /// Start instant in UTC. All-day events map to midnight UTC.
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.to_utc()
    }

    /// Calendar day of the start, used for range filtering.
    pub fn start_day(&self) -> NaiveDate {
        match self.start {
            EventTime::Date(d) => d,
            EventTime::DateTime(dt) => dt.date_naive(),
        }
    }

    /// Duration as (whole hours, whole minutes), derived from end - start.
    /// None if no end is present.
    pub fn duration_hm(&self) -> Option<(i64, i64)> {
        let end = self.end.as_ref()?.to_utc();
        let delta = end - self.start.to_utc();
        let minutes = delta.num_minutes();
        if minutes < 0 {
            return None;
        }
        Some((minutes / 60, minutes % 60))
    }
}

/// Event start/end: date-only (all-day) or an absolute UTC instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventTime {
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl EventTime {
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(d) => d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
            EventTime::DateTime(dt) => *dt,
        }
    }
}

/// Geographic coordinate (GEO property).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "CONFIRMED",
            EventStatus::Tentative => "TENTATIVE",
            EventStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_ics_str(s: &str) -> Self {
        match s {
            "TENTATIVE" => EventStatus::Tentative,
            "CANCELLED" => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
    Confidential,
}

impl Visibility {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Private => "PRIVATE",
            Visibility::Confidential => "CONFIDENTIAL",
        }
    }

    pub fn from_ics_str(s: &str) -> Self {
        match s {
            "PRIVATE" => Visibility::Private,
            "CONFIDENTIAL" => Visibility::Confidential,
            _ => Visibility::Public,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transparency {
    /// Event blocks time on the calendar (default).
    Opaque,
    /// Event does not block time.
    Transparent,
}

impl Transparency {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            Transparency::Opaque => "OPAQUE",
            Transparency::Transparent => "TRANSPARENT",
        }
    }
}
