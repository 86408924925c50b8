use std::cmp::Reverse;

use ulid::Ulid;

use crate::directory::Actor;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// One reservation, visible to its requester and to administrators.
    pub async fn get_reservation(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        let key = self.store.key_of(&id).ok_or(EngineError::NotFound("reservation", id))?;
        let sheet = self.store.sheet(&key).ok_or(EngineError::NotFound("reservation", id))?;
        let guard = sheet.read().await;
        let reservation = guard.get(&id).ok_or(EngineError::NotFound("reservation", id))?;
        if !actor.is_admin() && reservation.requester != actor.id {
            return Err(EngineError::Forbidden("not your reservation"));
        }
        Ok(reservation.clone())
    }

    /// Reservations matching `filter`. Administrators see everyone's, others only
    /// their own. Newest date first, then latest start first.
    pub async fn list_reservations(&self, actor: &Actor, filter: &ReservationFilter) -> Vec<Reservation> {
        let mut out = Vec::new();
        for sheet in self.store.sheets(filter.resource_id, filter.date) {
            let guard = sheet.read().await;
            out.extend(
                guard
                    .iter()
                    .filter(|r| actor.is_admin() || r.requester == actor.id)
                    .filter(|r| filter.matches(r))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (Reverse(r.date), Reverse(r.span.start), Reverse(r.created_at), r.id));
        out
    }

    /// How many reservations await a decision. Administrators only.
    pub async fn pending_count(&self, actor: &Actor) -> Result<usize, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden("only administrators may view the pending queue"));
        }
        let mut count = 0;
        for sheet in self.store.sheets(None, None) {
            count += sheet.read().await.iter().filter(|r| r.status == Status::Pending).count();
        }
        Ok(count)
    }
}
