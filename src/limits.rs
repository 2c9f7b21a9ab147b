use crate::model::Minute;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Business window rendered by the occupancy grid.
pub const DAY_OPEN: Minute = 9 * 60;
pub const DAY_CLOSE: Minute = 21 * 60;
pub const SLOT_MINUTES: Minute = 30;

pub const MAX_OWNER_LEN: usize = 64;
pub const MAX_NOTE_LEN: usize = 256;
pub const MAX_RESERVATIONS: usize = 100_000;

/// Upper bound on one encoded snapshot record; larger length prefixes are corruption.
pub const MAX_RECORD_LEN: usize = 64 * 1024;
