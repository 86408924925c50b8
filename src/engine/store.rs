use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::warn;
use ulid::Ulid;

use crate::model::*;

pub type SharedDaySheet = Arc<RwLock<DaySheet>>;

/// All reservations for one (resource, date) partition, sorted by start time.
#[derive(Debug, Default, Clone)]
pub struct DaySheet {
    reservations: Vec<Reservation>,
}

impl DaySheet {
    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Insert keeping start order. Replaces a record with the same id.
    fn insert(&mut self, reservation: Reservation) {
        self.reservations.retain(|r| r.id != reservation.id);
        let pos = self
            .reservations
            .partition_point(|r| (r.span.start, r.id) < (reservation.span.start, reservation.id));
        self.reservations.insert(pos, reservation);
    }

    pub fn approved(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.status == Status::Approved)
    }

    /// Pending reservations other than `exclude` whose interval overlaps `span`.
    pub fn pending_overlapping(&self, span: &Span, exclude: Ulid) -> Vec<Ulid> {
        self.reservations
            .iter()
            .filter(|r| r.id != exclude && r.status == Status::Pending && r.span.overlaps(span))
            .map(|r| r.id)
            .collect()
    }

    /// Apply an event to this partition. The caller holds the write lock.
    fn apply(&mut self, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => self.insert(reservation.clone()),
            Event::ReservationApproved {
                id,
                approved_at,
                auto_rejected,
                reason,
                ..
            } => {
                if let Some(r) = self.get_mut(id) {
                    r.status = Status::Approved;
                    r.approved_at = Some(*approved_at);
                } else {
                    warn!("approval for unknown reservation {id}");
                }
                for loser in auto_rejected {
                    if let Some(r) = self.get_mut(loser) {
                        r.status = Status::Rejected;
                        r.rejection_reason = Some(reason.clone());
                    }
                }
            }
            Event::ReservationRejected { id, reason, .. } => {
                if let Some(r) = self.get_mut(id) {
                    r.status = Status::Rejected;
                    r.rejection_reason = Some(reason.clone());
                }
            }
            Event::ReservationCancelled { id, .. } => {
                if let Some(r) = self.get_mut(id) {
                    r.status = Status::Cancelled;
                }
            }
        }
    }
}

/// In-memory reservation state: one locked sheet per day partition plus an id index.
#[derive(Default)]
pub struct ReservationStore {
    days: DashMap<DayKey, SharedDaySheet>,
    index: DashMap<Ulid, DayKey>,
}

impl ReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a replayed event log. Nothing is shared yet, so no locking.
    pub fn from_events(events: &[Event]) -> Self {
        let mut sheets: HashMap<DayKey, DaySheet> = HashMap::new();
        let index = DashMap::new();
        for event in events {
            if let Event::ReservationCreated { reservation } = event {
                index.insert(reservation.id, reservation.key());
            }
            sheets.entry(event.key()).or_default().apply(event);
        }
        let days = sheets
            .into_iter()
            .map(|(key, sheet)| (key, Arc::new(RwLock::new(sheet))))
            .collect();
        Self { days, index }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of (resource, date) partitions held in memory.
    pub fn partition_count(&self) -> usize {
        self.days.len()
    }

    pub fn key_of(&self, id: &Ulid) -> Option<DayKey> {
        self.index.get(id).map(|e| *e.value())
    }

    pub fn sheet(&self, key: &DayKey) -> Option<SharedDaySheet> {
        self.days.get(key).map(|e| e.value().clone())
    }

    /// The sheet for `key`, created empty on first use.
    pub fn sheet_or_default(&self, key: DayKey) -> SharedDaySheet {
        self.days.entry(key).or_default().value().clone()
    }

    /// Sheets matching an optional resource/date restriction. Clones the Arcs so no
    /// map reference is held across an await.
    pub fn sheets(&self, resource_id: Option<Ulid>, date: Option<chrono::NaiveDate>) -> Vec<SharedDaySheet> {
        self.days
            .iter()
            .filter(|e| {
                resource_id.is_none_or(|id| e.key().resource_id == id)
                    && date.is_none_or(|d| e.key().date == d)
            })
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn apply_event(&self, sheet: &mut DaySheet, event: &Event) {
        if let Event::ReservationCreated { reservation } = event {
            self.index.insert(reservation.id, reservation.key());
        }
        sheet.apply(event);
    }

    /// One snapshot event per reservation, in day-partition order.
    pub async fn snapshot(&self) -> Vec<Event> {
        let mut keyed: Vec<(DayKey, SharedDaySheet)> = self
            .days
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        keyed.sort_by_key(|(key, _)| *key);

        let mut events = Vec::with_capacity(self.len());
        for (_, sheet) in keyed {
            let guard = sheet.read().await;
            events.extend(guard.iter().map(|r| Event::ReservationCreated { reservation: r.clone() }));
        }
        events
    }
}
