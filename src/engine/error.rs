use crate::model::{Half, ReservationId};

/// Caller-side input problems, reported before any conflict check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `end <= start`.
    EmptyRange,
    EmptyOwner,
    /// A time past 24:00.
    TimeOutOfRange,
    TooLong(&'static str),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyRange => write!(f, "end time must be after start time"),
            ValidationError::EmptyOwner => write!(f, "owner name is required"),
            ValidationError::TimeOutOfRange => write!(f, "time must be between 00:00 and 24:00"),
            ValidationError::TooLong(field) => write!(f, "{field} is too long"),
        }
    }
}

#[derive(Debug)]
pub enum LedgerError {
    Validation(ValidationError),
    /// `half` is already held by reservation `with` for an overlapping time.
    Conflict {
        half: Half,
        with: ReservationId,
    },
    /// Unknown id, or the reservation is already cancelled.
    NotFound(ReservationId),
    /// Applied in memory but the snapshot write failed.
    NotSaved {
        id: ReservationId,
        reason: String,
    },
    LimitExceeded(&'static str),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Validation(e) => write!(f, "invalid request: {e}"),
            LedgerError::Conflict { half, with } => {
                write!(f, "{half} section already booked by reservation {with}")
            }
            LedgerError::NotFound(id) => write!(f, "no active reservation: {id}"),
            LedgerError::NotSaved { id, reason } => {
                write!(f, "reservation {id} applied but not saved: {reason}")
            }
            LedgerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<ValidationError> for LedgerError {
    fn from(e: ValidationError) -> Self {
        LedgerError::Validation(e)
    }
}
