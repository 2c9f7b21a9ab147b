use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;

/// Minutes since local midnight — the only time-of-day type.
pub type Minute = u32;

pub type ReservationId = Ulid;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

/// Parse `HH:MM` (24-hour). `24:00` is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Option<Minute> {
    let (h, m) = s.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let h: Minute = h.parse().ok()?;
    let m: Minute = m.parse().ok()?;
    if m >= 60 {
        return None;
    }
    let total = h * 60 + m;
    (total <= MINUTES_PER_DAY).then_some(total)
}

pub fn format_hhmm(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// One of the two atomic bookable spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Half {
    Front,
    Rear,
}

impl Half {
    pub const ALL: [Half; 2] = [Half::Front, Half::Rear];

    pub fn as_str(self) -> &'static str {
        match self {
            Half::Front => "front",
            Half::Rear => "rear",
        }
    }
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Half {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Section>()? {
            Section::Front => Ok(Half::Front),
            Section::Rear => Ok(Half::Rear),
            Section::Full => Err(UnknownSection(s.to_string())),
        }
    }
}

/// What a reservation books: one half, or both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Front,
    Rear,
    Full,
}

impl Section {
    /// The halves this section occupies, in conflict-check order.
    pub fn halves(self) -> &'static [Half] {
        match self {
            Section::Front => &[Half::Front],
            Section::Rear => &[Half::Rear],
            Section::Full => &Half::ALL,
        }
    }

    pub fn occupies(self, half: Half) -> bool {
        self.halves().contains(&half)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Front => "front",
            Section::Rear => "rear",
            Section::Full => "full",
        }
    }
}

impl From<Half> for Section {
    fn from(half: Half) -> Self {
        match half {
            Half::Front => Section::Front,
            Half::Rear => Section::Rear,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSection(pub String);

impl fmt::Display for UnknownSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown section: {:?}", self.0)
    }
}

impl std::error::Error for UnknownSection {}

impl FromStr for Section {
    type Err = UnknownSection;

    /// Accepts the English names and the legacy room labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "front" | "前方区画" => Ok(Section::Front),
            "rear" | "後方区画" => Ok(Section::Rear),
            "full" | "全体利用" => Ok(Section::Full),
            _ => Err(UnknownSection(s.to_string())),
        }
    }
}

/// Reservation lifecycle. `Cancelled` is terminal and carries the cancellation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Cancelled { at: NaiveDateTime },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub section: Section,
    pub date: NaiveDate,
    pub span: Span,
    pub owner: String,
    pub purpose: Option<String>,
    pub contact: Option<String>,
    pub status: Status,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        matches!(self.status, Status::Active)
    }

    pub fn cancelled_on(&self) -> Option<NaiveDateTime> {
        match self.status {
            Status::Active => None,
            Status::Cancelled { at } => Some(at),
        }
    }

    /// Active and holding `half` during some part of the day.
    pub fn blocks(&self, half: Half) -> bool {
        self.is_active() && self.section.occupies(half)
    }
}

/// Caller input for `Ledger::register`. Times are raw so that an inverted
/// range is reported as a validation error rather than built into a `Span`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub section: Section,
    pub date: NaiveDate,
    pub start: Minute,
    pub end: Minute,
    pub owner: String,
    pub purpose: Option<String>,
    pub contact: Option<String>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Busy,
}

impl SlotState {
    pub fn is_busy(self) -> bool {
        self == SlotState::Busy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotState::Free => "free",
            SlotState::Busy => "busy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOccupancy {
    pub span: Span,
    pub front: SlotState,
    pub rear: SlotState,
    /// Both halves busy, whether from one full booking or two half bookings.
    pub both: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyView {
    pub date: NaiveDate,
    pub slots: Vec<SlotOccupancy>,
}

impl OccupancyView {
    /// The slot starting at `start`, if it is inside the business window.
    pub fn slot_at(&self, start: Minute) -> Option<&SlotOccupancy> {
        self.slots.iter().find(|s| s.span.start == start)
    }
}
