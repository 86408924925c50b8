use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{CLOSING_MINUTE, OPENING_MINUTE};

/// Login name of a requester or administrator.
pub type UserId = String;

/// Wall-clock time of day at minute resolution (minutes since midnight).
///
/// Serialized as sortable `HH:MM` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time '{0}', expected HH:MM")]
pub struct ParseClockError(pub String);

impl ClockTime {
    pub const fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes < 24 * 60 { Some(Self(minutes)) } else { None }
    }

    pub const fn hm(hour: u16, minute: u16) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self(hour * 60 + minute))
    }

    pub const fn minutes(self) -> u16 {
        self.0
    }

    /// Parse `H:MM` / `HH:MM`. Anything else is an error, never midnight.
    pub fn parse(text: &str) -> Result<Self, ParseClockError> {
        let fail = || ParseClockError(text.to_string());
        let (h, m) = text.trim().split_once(':').ok_or_else(fail)?;
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(h) || h.len() > 2 || !digits(m) || m.len() != 2 {
            return Err(fail());
        }
        let hour: u16 = h.parse().map_err(|_| fail())?;
        let minute: u16 = m.parse().map_err(|_| fail())?;
        Self::hm(hour, minute).ok_or_else(fail)
    }

    pub fn to_naive_time(self) -> NaiveTime {
        // Always in range: the constructor caps at 23:59.
        NaiveTime::from_hms_opt(u32::from(self.0 / 60), u32::from(self.0 % 60), 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for ClockTime {
    type Err = ParseClockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = ParseClockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

/// Minutes since midnight for `HH:MM` text.
pub fn parse_clock(text: &str) -> Result<u16, ParseClockError> {
    ClockTime::parse(text).map(ClockTime::minutes)
}

/// Half-open overlap test: touching endpoints do not overlap.
pub fn overlaps(start_a: u16, end_a: u16, start_b: u16, end_b: u16) -> bool {
    start_a < end_b && end_a > start_b
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl Span {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(
            self.start.minutes(),
            self.end.minutes(),
            other.start.minutes(),
            other.end.minutes(),
        )
    }

    pub fn within_office_hours(&self) -> bool {
        self.start.minutes() >= OPENING_MINUTE && self.end.minutes() <= CLOSING_MINUTE
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}–{}", self.start, self.end)
    }
}

/// The (resource, date) partition. All conflict checks and locking are scoped to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub resource_id: Ulid,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(resource_id: Ulid, date: NaiveDate) -> Self {
        Self { resource_id, date }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource_id, self.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Confirmed on creation.
    Internal,
    /// Held as pending until an administrator decides.
    External,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Internal => "internal",
            Category::External => "external",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An administrative or requester action on an existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject,
    Cancel,
}

impl Transition {
    /// Source states this action may leave from.
    pub fn permitted_from(self, status: Status) -> bool {
        match (self, status) {
            (Transition::Approve | Transition::Reject, Status::Pending) => true,
            (Transition::Cancel, Status::Pending | Status::Approved) => true,
            (_, Status::Pending | Status::Approved | Status::Rejected | Status::Cancelled) => false,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diet {
    #[serde(rename = "veg")]
    Veg,
    #[serde(rename = "non-veg")]
    NonVeg,
}

impl FromStr for Diet {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "veg" => Ok(Diet::Veg),
            "non-veg" | "nonveg" | "non_veg" => Ok(Diet::NonVeg),
            _ => Err(()),
        }
    }
}

/// A bookable room. Reference data: the engine never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    #[serde(default)]
    pub blocked: bool,
    /// Longest single reservation, in minutes.
    pub max_duration: u16,
    #[serde(default)]
    pub floor: String,
    #[serde(default)]
    pub amenities: Vec<String>,
}

impl Resource {
    pub fn check(&self) -> Result<(), &'static str> {
        if self.capacity < 1 {
            return Err("capacity must be at least 1");
        }
        if self.max_duration == 0 {
            return Err("maximum duration must be positive");
        }
        Ok(())
    }
}

/// A stored reservation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub requester: UserId,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub category: Category,
    pub purpose: String,
    pub attendees: Option<u32>,
    pub food: bool,
    pub diet: Option<Diet>,
    pub remarks: String,
    pub status: Status,
    pub rejection_reason: Option<String>,
    pub approved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl Reservation {
    pub fn key(&self) -> DayKey {
        DayKey::new(self.resource_id, self.date)
    }

    /// Local wall-clock instant the meeting begins.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.span.start.to_naive_time())
    }
}

/// A creation request as submitted by a requester. Text fields are parsed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub resource_id: Ulid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub category: Category,
    pub purpose: String,
    #[serde(default)]
    pub attendees: Option<u32>,
    #[serde(default)]
    pub food: bool,
    #[serde(default)]
    pub diet: Option<String>,
    #[serde(default)]
    pub remarks: String,
}

/// Result of an approval, including the pending competitors the cascade rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub reservation: Reservation,
    pub auto_rejected: Vec<Ulid>,
}

/// Filters for listing reservations. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFilter {
    #[serde(default)]
    pub resource_id: Option<Ulid>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Case-insensitive substring of purpose or requester.
    #[serde(default)]
    pub text: Option<String>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        if self.resource_id.is_some_and(|id| id != r.resource_id)
            || self.status.is_some_and(|s| s != r.status)
            || self.category.is_some_and(|c| c != r.category)
            || self.date.is_some_and(|d| d != r.date)
        {
            return false;
        }
        match self.text.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                r.purpose.to_lowercase().contains(&needle)
                    || r.requester.to_lowercase().contains(&needle)
            }
        }
    }
}

/// The event types: the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Also used as the snapshot record when compacting, so it carries the full status.
    ReservationCreated {
        reservation: Reservation,
    },
    /// Approval and its cascade, applied as one unit.
    ReservationApproved {
        key: DayKey,
        id: Ulid,
        approved_at: NaiveDateTime,
        auto_rejected: Vec<Ulid>,
        reason: String,
    },
    ReservationRejected {
        key: DayKey,
        id: Ulid,
        reason: String,
    },
    ReservationCancelled {
        key: DayKey,
        id: Ulid,
    },
}

impl Event {
    pub fn key(&self) -> DayKey {
        match self {
            Event::ReservationCreated { reservation } => reservation.key(),
            Event::ReservationApproved { key, .. }
            | Event::ReservationRejected { key, .. }
            | Event::ReservationCancelled { key, .. } => *key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u16, m: u16) -> ClockTime {
        ClockTime::hm(h, m).unwrap()
    }

    #[test]
    fn clock_parse_accepts_short_and_padded_hours() {
        assert_eq!(parse_clock("9:30").unwrap(), 570);
        assert_eq!(parse_clock("09:30").unwrap(), 570);
        assert_eq!(parse_clock(" 20:00 ").unwrap(), 1200);
        assert_eq!(parse_clock("00:00").unwrap(), 0);
    }

    #[test]
    fn clock_parse_rejects_malformed_text() {
        for bad in ["", "9", "9:5", "ab:cd", "24:00", "12:60", "-1:00", "12:00:00", "1200", "123:00"] {
            assert!(ClockTime::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn clock_display_is_zero_padded() {
        assert_eq!(t(9, 5).to_string(), "09:05");
        assert_eq!(String::from(t(17, 45)), "17:45");
    }

    #[test]
    fn clock_serde_uses_text() {
        let json = serde_json::to_string(&t(10, 30)).unwrap();
        assert_eq!(json, "\"10:30\"");
        let back: ClockTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t(10, 30));
        assert!(serde_json::from_str::<ClockTime>("\"10h30\"").is_err());
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(t(10, 0), t(11, 0));
        let b = Span::new(t(10, 30), t(11, 30));
        let c = Span::new(t(11, 0), t(12, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // touching
        assert!(!c.overlaps(&a));
        assert_eq!(a.duration_minutes(), 60);
    }

    #[test]
    fn span_contained_interval_overlaps() {
        let outer = Span::new(t(9, 0), t(12, 0));
        let inner = Span::new(t(10, 0), t(10, 15));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn span_display_uses_en_dash() {
        assert_eq!(Span::new(t(10, 0), t(11, 0)).to_string(), "10:00–11:00");
    }

    #[test]
    fn office_hours_bounds_are_inclusive() {
        assert!(Span::new(t(9, 0), t(20, 0)).within_office_hours());
        assert!(!Span::new(t(8, 59), t(10, 0)).within_office_hours());
        assert!(!Span::new(t(19, 0), t(20, 1)).within_office_hours());
    }

    #[test]
    fn transitions_only_leave_matching_states() {
        use Status::*;
        assert!(Transition::Approve.permitted_from(Pending));
        assert!(!Transition::Approve.permitted_from(Approved));
        assert!(Transition::Reject.permitted_from(Pending));
        assert!(!Transition::Reject.permitted_from(Approved));
        assert!(Transition::Cancel.permitted_from(Pending));
        assert!(Transition::Cancel.permitted_from(Approved));
        for terminal in [Rejected, Cancelled] {
            for action in [Transition::Approve, Transition::Reject, Transition::Cancel] {
                assert!(!action.permitted_from(terminal));
            }
        }
    }

    #[test]
    fn diet_accepts_spellings() {
        assert_eq!("veg".parse::<Diet>(), Ok(Diet::Veg));
        assert_eq!("Non-Veg".parse::<Diet>(), Ok(Diet::NonVeg));
        assert_eq!("nonveg".parse::<Diet>(), Ok(Diet::NonVeg));
        assert!("vegan".parse::<Diet>().is_err());
    }

    #[test]
    fn resource_check_enforces_invariants() {
        let mut r = Resource {
            id: Ulid::new(),
            name: "Room".into(),
            capacity: 4,
            blocked: false,
            max_duration: 60,
            floor: String::new(),
            amenities: vec![],
        };
        assert!(r.check().is_ok());
        r.capacity = 0;
        assert!(r.check().is_err());
        r.capacity = 1;
        r.max_duration = 0;
        assert!(r.check().is_err());
    }

    fn sample(purpose: &str, requester: &str) -> Reservation {
        let at = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        Reservation {
            id: Ulid::new(),
            requester: requester.into(),
            resource_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
            span: Span::new(t(10, 0), t(11, 0)),
            category: Category::External,
            purpose: purpose.into(),
            attendees: None,
            food: false,
            diet: None,
            remarks: String::new(),
            status: Status::Pending,
            rejection_reason: None,
            approved_at: None,
            created_at: at,
        }
    }

    #[test]
    fn filter_text_matches_purpose_or_requester() {
        let r = sample("Quarterly Review", "dana");
        let by_purpose = ReservationFilter { text: Some("quarterly".into()), ..Default::default() };
        let by_requester = ReservationFilter { text: Some("DAN".into()), ..Default::default() };
        let miss = ReservationFilter { text: Some("standup".into()), ..Default::default() };
        assert!(by_purpose.matches(&r));
        assert!(by_requester.matches(&r));
        assert!(!miss.matches(&r));
    }

    #[test]
    fn filter_fields_combine() {
        let r = sample("Sync", "lee");
        let f = ReservationFilter {
            status: Some(Status::Pending),
            category: Some(Category::External),
            date: Some(r.date),
            resource_id: Some(r.resource_id),
            text: None,
        };
        assert!(f.matches(&r));
        let wrong_status = ReservationFilter { status: Some(Status::Approved), ..f.clone() };
        assert!(!wrong_status.matches(&r));
    }

    #[test]
    fn starts_at_combines_date_and_start() {
        let r = sample("Sync", "lee");
        assert_eq!(r.starts_at(), r.date.and_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated { reservation: sample("Sync", "lee") };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
