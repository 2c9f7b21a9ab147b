use chrono::NaiveDate;

use crate::limits::{DAY_CLOSE, DAY_OPEN};
use crate::model::*;
use crate::snapshot::Store;

use super::occupancy::{busy_spans, slot_grid, subtract_intervals};
use super::Ledger;

impl<S: Store> Ledger<S> {
    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.by_id.get(id).map(|&pos| &self.reservations[pos])
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Every record, active and cancelled, in insertion order.
    pub fn snapshot(&self) -> &[Reservation] {
        &self.reservations
    }

    /// All reservations on `date` (cancelled ones included), by start time.
    /// Ties keep insertion order.
    pub fn list(&self, date: NaiveDate) -> Vec<Reservation> {
        let mut day: Vec<Reservation> = self.on_date(date).cloned().collect();
        day.sort_by_key(|r| r.span.start);
        day
    }

    pub fn list_active(&self, date: NaiveDate) -> Vec<Reservation> {
        let mut day = self.list(date);
        day.retain(Reservation::is_active);
        day
    }

    /// Per-slot busy/free grid over the business window.
    pub fn occupancy(&self, date: NaiveDate) -> OccupancyView {
        let front = busy_spans(self.on_date(date), Half::Front);
        let rear = busy_spans(self.on_date(date), Half::Rear);
        OccupancyView {
            date,
            slots: slot_grid(&front, &rear),
        }
    }

    /// Free windows of `half` inside the business window, at minute resolution.
    pub fn free_spans(&self, date: NaiveDate, half: Half) -> Vec<Span> {
        let busy = busy_spans(self.on_date(date), half);
        subtract_intervals(&[Span::new(DAY_OPEN, DAY_CLOSE)], &busy)
    }
}
