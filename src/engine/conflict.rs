use chrono::{Local, NaiveDateTime, Timelike};

use crate::limits::*;
use crate::model::*;

use super::error::ValidationError;
use super::LedgerError;

/// Local wall-clock time at whole-second precision, the resolution the snapshot keeps.
pub(crate) fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Normalize free text: trimmed, with empty meaning absent.
fn note(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Check caller input and return the span plus normalized owner/purpose/contact.
pub(crate) fn validate_request(
    request: &BookingRequest,
) -> Result<(Span, String, Option<String>, Option<String>), ValidationError> {
    if request.start > MINUTES_PER_DAY || request.end > MINUTES_PER_DAY {
        return Err(ValidationError::TimeOutOfRange);
    }
    if request.end <= request.start {
        return Err(ValidationError::EmptyRange);
    }
    let owner = request.owner.trim();
    if owner.is_empty() {
        return Err(ValidationError::EmptyOwner);
    }
    if owner.chars().count() > MAX_OWNER_LEN {
        return Err(ValidationError::TooLong("owner"));
    }
    let purpose = note(&request.purpose);
    let contact = note(&request.contact);
    if purpose.as_ref().is_some_and(|p| p.chars().count() > MAX_NOTE_LEN) {
        return Err(ValidationError::TooLong("purpose"));
    }
    if contact.as_ref().is_some_and(|c| c.chars().count() > MAX_NOTE_LEN) {
        return Err(ValidationError::TooLong("contact"));
    }
    Ok((Span::new(request.start, request.end), owner.to_string(), purpose, contact))
}

/// Reject `span` on `section` if any half it touches is already held.
///
/// `same_day` must contain only reservations on the requested date. Every
/// touched half is checked before anything is written, so a full booking
/// never lands on one half while the other is taken.
pub(crate) fn check_no_conflict<'a>(
    same_day: impl Iterator<Item = &'a Reservation> + Clone,
    section: Section,
    span: &Span,
) -> Result<(), LedgerError> {
    for &half in section.halves() {
        if let Some(blocking) = same_day
            .clone()
            .find(|r| r.blocks(half) && r.span.overlaps(span))
        {
            return Err(LedgerError::Conflict {
                half,
                with: blocking.id,
            });
        }
    }
    Ok(())
}
