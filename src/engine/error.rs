use ulid::Ulid;

use crate::model::{ParseClockError, Span, Status, Transition};

/// A request that breaks a booking rule. User-facing; never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    MalformedTime(#[from] ParseClockError),
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    MalformedDate(String),
    #[error("bookings must fall within office hours, 09:00 to 20:00")]
    OutsideOfficeHours,
    #[error("end time must be after start time")]
    EndNotAfterStart,
    #[error("bookings must last at least {min} minutes")]
    TooShort { min: u16 },
    #[error("cannot book a date in the past")]
    PastDate,
    #[error("room '{0}' is currently blocked")]
    ResourceBlocked(String),
    #[error("exceeds the maximum of {max} minutes for this room")]
    ExceedsMaxDuration { max: u16 },
    #[error("exceeds room capacity ({capacity})")]
    ExceedsCapacity { capacity: u32 },
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("a dietary preference is required when food is requested")]
    DietaryPreferenceRequired,
    #[error("unknown dietary preference '{0}', expected veg or non-veg")]
    UnknownDiet(String),
    #[error("a rejection reason is required")]
    ReasonRequired,
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
}

impl ValidationError {
    /// Stable metric label.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MalformedTime(_) => "malformed_time",
            ValidationError::MalformedDate(_) => "malformed_date",
            ValidationError::OutsideOfficeHours => "outside_office_hours",
            ValidationError::EndNotAfterStart => "end_not_after_start",
            ValidationError::TooShort { .. } => "too_short",
            ValidationError::PastDate => "past_date",
            ValidationError::ResourceBlocked(_) => "resource_blocked",
            ValidationError::ExceedsMaxDuration { .. } => "exceeds_max_duration",
            ValidationError::ExceedsCapacity { .. } => "exceeds_capacity",
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::DietaryPreferenceRequired => "diet_required",
            ValidationError::UnknownDiet(_) => "unknown_diet",
            ValidationError::ReasonRequired => "reason_required",
            ValidationError::TooLong { .. } => "too_long",
        }
    }
}

/// Why the admission check turned a candidate away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("room {0} not found")]
    UnknownResource(Ulid),
    #[error("conflicts with an approved booking ({span})")]
    Conflict { id: Ulid, span: Span },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::Invalid(v) => v.code(),
            Rejection::UnknownResource(_) => "unknown_resource",
            Rejection::Conflict { .. } => "conflict",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} {1} not found")]
    NotFound(&'static str, Ulid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("conflicts with approved booking {id} ({span})")]
    Conflict { id: Ulid, span: Span },
    #[error("cannot {action} reservation {id}: it is {from}")]
    InvalidStateTransition {
        id: Ulid,
        from: Status,
        action: Transition,
    },
    /// Detail is logged where the failure happens and never shown to callers.
    #[error("internal storage error")]
    Storage(String),
}

impl EngineError {
    /// Taxonomy label used on the wire and in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(..) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Conflict { .. } => "conflict",
            EngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EngineError::Storage(_) => "internal",
        }
    }
}

impl From<Rejection> for EngineError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Invalid(v) => EngineError::Validation(v),
            Rejection::UnknownResource(id) => EngineError::NotFound("room", id),
            Rejection::Conflict { id, span } => EngineError::Conflict { id, span },
        }
    }
}
