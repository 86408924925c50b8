use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::directory::Actor;
use crate::limits::*;
use crate::model::*;
use crate::notify::{NotificationKind, NotificationRequest};
use crate::observability::{AUTO_REJECTED_TOTAL, REJECTIONS_TOTAL, RESERVATIONS_CREATED_TOTAL, TRANSITIONS_TOTAL};

use super::admission::{self, find_conflict, Candidate};
use super::error::{Rejection, ValidationError};
use super::{Engine, EngineError};

pub const AUTO_REJECT_REASON: &str = "Slot was taken by another approved booking for the same time.";

fn check_len(field: &'static str, text: &str, max: usize) -> Result<(), ValidationError> {
    if text.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Field checks that do not depend on stored state.
fn check_fields(request: &NewReservation) -> Result<(NaiveDate, Option<Diet>), ValidationError> {
    if request.purpose.trim().is_empty() {
        return Err(ValidationError::MissingField("purpose"));
    }
    check_len("purpose", &request.purpose, MAX_PURPOSE_LEN)?;
    check_len("remarks", &request.remarks, MAX_REMARKS_LEN)?;

    let diet = match (request.category, request.food) {
        (Category::External, true) => {
            let text = request.diet.as_deref().map(str::trim).unwrap_or("");
            if text.is_empty() {
                return Err(ValidationError::DietaryPreferenceRequired);
            }
            Some(text.parse::<Diet>().map_err(|()| ValidationError::UnknownDiet(text.to_string()))?)
        }
        _ => None,
    };

    let date = NaiveDate::parse_from_str(request.date.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::MalformedDate(request.date.clone()))?;
    Ok((date, diet))
}

fn invalid_transition(r: &Reservation, action: Transition) -> EngineError {
    EngineError::InvalidStateTransition { id: r.id, from: r.status, action }
}

impl Engine {
    /// Admit a new reservation. Internal meetings are confirmed immediately;
    /// external ones wait for an administrator.
    pub async fn create_reservation(
        &self,
        actor: &Actor,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let (date, diet) = check_fields(&request)?;
        let key = DayKey::new(request.resource_id, date);
        let now = self.clock.now();
        let today = self.clock.today();

        let candidate = Candidate {
            resource_id: request.resource_id,
            date,
            start_time: &request.start_time,
            end_time: &request.end_time,
            attendees: request.attendees,
        };
        let count_rejection = |rejection: &Rejection| {
            metrics::counter!(REJECTIONS_TOTAL, "reason" => rejection.code()).increment(1);
        };
        // Stateless checks run before the partition exists; only the overlap check needs it.
        admission::validate(&candidate, self.registry.as_ref(), std::iter::empty(), None, today)
            .inspect_err(count_rejection)?;

        let gate = self.commit_gate.read().await;
        let sheet = self.store.sheet_or_default(key);
        let mut guard = sheet.write().await;
        let admitted = admission::validate(&candidate, self.registry.as_ref(), guard.approved(), None, today)
            .inspect_err(count_rejection)?;

        let (status, approved_at) = match request.category {
            Category::Internal => (Status::Approved, Some(now)),
            Category::External => (Status::Pending, None),
        };
        let reservation = Reservation {
            id: Ulid::new(),
            requester: actor.id.clone(),
            resource_id: request.resource_id,
            date,
            span: admitted.span,
            category: request.category,
            purpose: request.purpose.trim().to_string(),
            attendees: request.attendees,
            food: request.food,
            diet,
            remarks: request.remarks,
            status,
            rejection_reason: None,
            approved_at,
            created_at: now,
        };
        let event = Event::ReservationCreated { reservation: reservation.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        drop(gate);

        metrics::counter!(RESERVATIONS_CREATED_TOTAL, "category" => reservation.category.as_str()).increment(1);
        info!(
            "reservation {} created by {} for {} {} as {}",
            reservation.id, reservation.requester, key, reservation.span, reservation.status
        );

        let body = format!("{} booked {} on {}", reservation.requester, admitted.resource.name, date);
        let requests = self
            .directory
            .active_admins()
            .into_iter()
            .map(|admin| NotificationRequest::new(admin, "New Booking", body.clone(), NotificationKind::Info))
            .collect();
        self.deliver(requests).await;

        Ok(reservation)
    }

    /// Cancel a pending or approved reservation. Requesters may only cancel their own,
    /// and only before the meeting starts; administrators may cancel any.
    pub async fn cancel_reservation(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound("reservation", id))?;

        if !actor.is_admin() && current.requester != actor.id {
            return Err(EngineError::Forbidden("only the requester or an administrator may cancel"));
        }
        if !Transition::Cancel.permitted_from(current.status) {
            return Err(invalid_transition(current, Transition::Cancel));
        }
        if !actor.is_admin() && self.clock.now() >= current.starts_at() {
            return Err(EngineError::Forbidden("meeting already started"));
        }

        let event = Event::ReservationCancelled { key: current.key(), id };
        self.persist_and_apply(&mut guard, &event).await?;
        let cancelled = guard.get(&id).cloned().ok_or(EngineError::NotFound("reservation", id))?;
        drop(guard);

        metrics::counter!(TRANSITIONS_TOTAL, "action" => "cancel").increment(1);
        info!("reservation {id} cancelled by {}", actor.id);
        Ok(cancelled)
    }

    /// Confirm a pending reservation and reject every pending competitor whose
    /// interval overlaps it. Both happen in one durable event.
    pub async fn approve_reservation(&self, actor: &Actor, id: Ulid) -> Result<Approval, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden("only administrators may approve reservations"));
        }

        let gate = self.commit_gate.read().await;
        let mut guard = self.resolve_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound("reservation", id))?;

        if !Transition::Approve.permitted_from(current.status) {
            return Err(invalid_transition(current, Transition::Approve));
        }
        if let Some(existing) = find_conflict(guard.approved(), &current.span, Some(id)) {
            return Err(EngineError::Conflict { id: existing.id, span: existing.span });
        }

        let key = current.key();
        let auto_rejected = guard.pending_overlapping(&current.span, id);
        let event = Event::ReservationApproved {
            key,
            id,
            approved_at: self.clock.now(),
            auto_rejected: auto_rejected.clone(),
            reason: AUTO_REJECT_REASON.to_string(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let approved = guard.get(&id).cloned().ok_or(EngineError::NotFound("reservation", id))?;
        let losers: Vec<UserId> = auto_rejected
            .iter()
            .filter_map(|loser| guard.get(loser).map(|r| r.requester.clone()))
            .collect();
        drop(guard);
        drop(gate);

        metrics::counter!(TRANSITIONS_TOTAL, "action" => "approve").increment(1);
        metrics::counter!(AUTO_REJECTED_TOTAL).increment(auto_rejected.len() as u64);
        info!(
            "reservation {id} approved by {} on {key}, {} competitor(s) auto-rejected",
            actor.id,
            auto_rejected.len()
        );

        let mut requests = vec![NotificationRequest::new(
            approved.requester.clone(),
            "Booking Approved",
            format!("Your booking for {} has been approved.", approved.date),
            NotificationKind::Success,
        )];
        requests.extend(losers.into_iter().map(|requester| {
            NotificationRequest::new(
                requester,
                "Booking Auto-Rejected",
                format!(
                    "Another booking was approved for the same time slot on {}. Please choose a different time.",
                    approved.date
                ),
                NotificationKind::Error,
            )
        }));
        self.deliver(requests).await;

        Ok(Approval { reservation: approved, auto_rejected })
    }

    /// Decline a pending reservation with a reason shown to the requester.
    pub async fn reject_reservation(&self, actor: &Actor, id: Ulid, reason: &str) -> Result<Reservation, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden("only administrators may reject reservations"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::ReasonRequired.into());
        }
        check_len("reason", reason, MAX_REASON_LEN)?;

        let gate = self.commit_gate.read().await;
        let mut guard = self.resolve_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound("reservation", id))?;
        if !Transition::Reject.permitted_from(current.status) {
            return Err(invalid_transition(current, Transition::Reject));
        }

        let event = Event::ReservationRejected { key: current.key(), id, reason: reason.to_string() };
        self.persist_and_apply(&mut guard, &event).await?;
        let rejected = guard.get(&id).cloned().ok_or(EngineError::NotFound("reservation", id))?;
        drop(guard);
        drop(gate);

        metrics::counter!(TRANSITIONS_TOTAL, "action" => "reject").increment(1);
        info!("reservation {id} rejected by {}", actor.id);

        self.deliver(vec![NotificationRequest::new(
            rejected.requester.clone(),
            "Booking Rejected",
            format!("Reason: {reason}"),
            NotificationKind::Error,
        )])
        .await;

        Ok(rejected)
    }
}
