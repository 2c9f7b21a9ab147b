use chrono::NaiveDateTime;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_RESERVATIONS;
use crate::model::*;
use crate::snapshot::Store;

use super::conflict::{check_no_conflict, now, validate_request};
use super::{Ledger, LedgerError};

impl<S: Store> Ledger<S> {
    /// Accept a booking if every half it touches is free, then persist.
    ///
    /// All-or-nothing: on any error other than `NotSaved` the ledger is unchanged.
    pub fn register(&mut self, request: BookingRequest) -> Result<ReservationId, LedgerError> {
        let (span, owner, purpose, contact) = validate_request(&request)?;
        if self.reservations.len() >= MAX_RESERVATIONS {
            return Err(LedgerError::LimitExceeded("too many reservations"));
        }

        if let Err(e) = check_no_conflict(self.on_date(request.date), request.section, &span) {
            if let LedgerError::Conflict { half, with } = &e {
                warn!(
                    "rejected {} {} {span} for {owner}: {half} held by {with}",
                    request.section, request.date
                );
                metrics::counter!(crate::observability::CONFLICTS_TOTAL, "half" => half.as_str())
                    .increment(1);
            }
            return Err(e);
        }

        let id = Ulid::new();
        self.insert(Reservation {
            id,
            section: request.section,
            date: request.date,
            span,
            owner,
            purpose,
            contact,
            status: Status::Active,
        });
        info!("registered {id}: {} {} {span}", request.section, request.date);

        self.commit(id)?;
        Ok(id)
    }

    /// Cancel now. See [`Ledger::cancel_at`].
    pub fn cancel(&mut self, id: ReservationId) -> Result<(), LedgerError> {
        self.cancel_at(id, now())
    }

    /// Mark `id` cancelled at `at`. The record is kept for history.
    ///
    /// Cancelling an unknown or already-cancelled id is `NotFound` and leaves
    /// the first cancellation time untouched.
    pub fn cancel_at(&mut self, id: ReservationId, at: NaiveDateTime) -> Result<(), LedgerError> {
        let pos = *self.by_id.get(&id).ok_or(LedgerError::NotFound(id))?;
        let reservation = &mut self.reservations[pos];
        if !reservation.is_active() {
            return Err(LedgerError::NotFound(id));
        }
        reservation.status = Status::Cancelled { at };
        info!(
            "cancelled {id}: {} {} {}",
            reservation.section, reservation.date, reservation.span
        );

        self.commit(id)
    }
}
