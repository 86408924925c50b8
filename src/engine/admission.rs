use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::{CLOSING_MINUTE, MIN_DURATION_MINUTES, OPENING_MINUTE};
use crate::model::*;
use crate::registry::ResourceRegistry;

use super::error::{Rejection, ValidationError};

/// The slot-related part of a creation request.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start_time: &'a str,
    pub end_time: &'a str,
    pub attendees: Option<u32>,
}

/// A candidate that passed every check.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub span: Span,
    pub resource: Resource,
}

/// First approved reservation (other than `exclude`) whose interval overlaps `span`.
pub fn find_conflict<'r>(
    approved: impl IntoIterator<Item = &'r Reservation>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'r Reservation> {
    approved
        .into_iter()
        .filter(|r| Some(r.id) != exclude)
        .find(|r| r.status == Status::Approved && r.span.overlaps(span))
}

/// Decide whether `candidate` may be booked. Pure: the caller supplies the approved
/// reservations of the candidate's day partition and today's date.
///
/// Checks run in a fixed order and the first failure wins.
pub fn validate<'r>(
    candidate: &Candidate<'_>,
    registry: &dyn ResourceRegistry,
    approved: impl IntoIterator<Item = &'r Reservation>,
    exclude: Option<Ulid>,
    today: NaiveDate,
) -> Result<Admitted, Rejection> {
    let start = ClockTime::parse(candidate.start_time).map_err(ValidationError::from)?;
    let end = ClockTime::parse(candidate.end_time).map_err(ValidationError::from)?;
    let (s, e) = (start.minutes(), end.minutes());

    if s < OPENING_MINUTE || e > CLOSING_MINUTE {
        return Err(ValidationError::OutsideOfficeHours.into());
    }
    if s >= e {
        return Err(ValidationError::EndNotAfterStart.into());
    }
    if e - s < MIN_DURATION_MINUTES {
        return Err(ValidationError::TooShort { min: MIN_DURATION_MINUTES }.into());
    }
    if candidate.date < today {
        return Err(ValidationError::PastDate.into());
    }

    let resource = registry
        .get_resource(&candidate.resource_id)
        .ok_or(Rejection::UnknownResource(candidate.resource_id))?;
    if resource.blocked {
        return Err(ValidationError::ResourceBlocked(resource.name).into());
    }
    let span = Span::new(start, end);
    if span.duration_minutes() > resource.max_duration {
        return Err(ValidationError::ExceedsMaxDuration { max: resource.max_duration }.into());
    }
    if candidate.attendees.is_some_and(|n| n > resource.capacity) {
        return Err(ValidationError::ExceedsCapacity { capacity: resource.capacity }.into());
    }

    if let Some(existing) = find_conflict(approved, &span, exclude) {
        return Err(Rejection::Conflict { id: existing.id, span: existing.span });
    }

    Ok(Admitted { span, resource })
}
