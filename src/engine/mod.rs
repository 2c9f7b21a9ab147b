mod conflict;
mod error;
mod mutations;
mod occupancy;
mod queries;

pub use error::{LedgerError, ValidationError};
pub use occupancy::{busy_spans, merge_overlapping, slot_grid, subtract_intervals};

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::model::*;
use crate::snapshot::{SnapshotFile, Store};

/// The single owner of all reservations.
///
/// Reservations are kept in insertion order (that is also the snapshot order);
/// `by_id` and `by_date` index into that vector. Records are never removed:
/// cancellation only flips the status.
pub struct Ledger<S: Store = SnapshotFile> {
    reservations: Vec<Reservation>,
    by_id: HashMap<ReservationId, usize>,
    by_date: HashMap<NaiveDate, Vec<usize>>,
    store: S,
}

impl<S: Store> Ledger<S> {
    /// Load the snapshot once. A failed load starts an empty ledger.
    pub fn open(mut store: S) -> Self {
        let loaded = match store.load() {
            Ok(rs) => rs,
            Err(e) => {
                warn!("could not load reservations, starting empty: {e}");
                Vec::new()
            }
        };

        let mut ledger = Self {
            reservations: Vec::with_capacity(loaded.len()),
            by_id: HashMap::new(),
            by_date: HashMap::new(),
            store,
        };
        for r in loaded {
            if ledger.by_id.contains_key(&r.id) {
                warn!("dropping duplicate reservation {} from snapshot", r.id);
                continue;
            }
            if r.is_active()
                && let Err(e) = conflict::check_no_conflict(ledger.on_date(r.date), r.section, &r.span)
            {
                warn!("loaded reservation {} overlaps existing booking: {e}", r.id);
            }
            ledger.insert(r);
        }

        info!("ledger loaded with {} reservations", ledger.reservations.len());
        metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).set(ledger.active_count() as f64);
        ledger
    }

    fn insert(&mut self, reservation: Reservation) {
        let pos = self.reservations.len();
        self.by_id.insert(reservation.id, pos);
        self.by_date.entry(reservation.date).or_default().push(pos);
        self.reservations.push(reservation);
    }

    /// All reservations on `date`, in insertion order.
    pub(super) fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> + Clone {
        let reservations = &self.reservations;
        self.by_date
            .get(&date)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(move |&pos| &reservations[pos])
    }

    pub fn active_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.is_active()).count()
    }

    /// Write the full snapshot. On failure the in-memory change for `id` stays.
    pub(super) fn commit(&mut self, id: ReservationId) -> Result<(), LedgerError> {
        metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).set(self.active_count() as f64);
        let save_start = std::time::Instant::now();
        let result = self.store.save(&self.reservations);
        metrics::histogram!(crate::observability::SNAPSHOT_SAVE_DURATION_SECONDS)
            .record(save_start.elapsed().as_secs_f64());
        result.map_err(|e| {
            warn!("snapshot save failed after change to {id}: {e}");
            metrics::counter!(crate::observability::SNAPSHOT_SAVE_FAILURES_TOTAL).increment(1);
            LedgerError::NotSaved {
                id,
                reason: e.to_string(),
            }
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
