use crate::limits::{DAY_CLOSE, DAY_OPEN, SLOT_MINUTES};
use crate::model::*;

// ── Occupancy Algorithm ───────────────────────────────────────────

/// Merged busy spans of one half, from the reservations of a single day.
pub fn busy_spans<'a>(same_day: impl Iterator<Item = &'a Reservation>, half: Half) -> Vec<Span> {
    let mut spans: Vec<Span> = same_day.filter(|r| r.blocks(half)).map(|r| r.span).collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Quantize busy spans onto the fixed 30-minute business grid.
pub fn slot_grid(front_busy: &[Span], rear_busy: &[Span]) -> Vec<SlotOccupancy> {
    business_slots()
        .map(|slot| {
            let front = state_of(front_busy, &slot);
            let rear = state_of(rear_busy, &slot);
            SlotOccupancy {
                span: slot,
                front,
                rear,
                both: front.is_busy() && rear.is_busy(),
            }
        })
        .collect()
}

/// Slots from opening to closing, `SLOT_MINUTES` each.
pub fn business_slots() -> impl Iterator<Item = Span> {
    (DAY_OPEN..DAY_CLOSE)
        .step_by(SLOT_MINUTES as usize)
        .map(|start| Span::new(start, start + SLOT_MINUTES))
}

fn state_of(busy: &[Span], slot: &Span) -> SlotState {
    if busy.iter().any(|b| b.overlaps(slot)) {
        SlotState::Busy
    } else {
        SlotState::Free
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_business_window() {
        let grid = slot_grid(&[], &[]);
        assert_eq!(grid.len(), 24);
        assert_eq!(grid[0].span, Span::new(540, 570));
        assert_eq!(grid[23].span, Span::new(1230, 1260));
        assert!(grid.iter().all(|s| s.front == SlotState::Free && !s.both));
    }

    #[test]
    fn partial_overlap_marks_slot_busy() {
        // 10:45-11:15 touches the 10:30 and 11:00 slots
        let grid = slot_grid(&[Span::new(645, 675)], &[]);
        let busy: Vec<Minute> = grid
            .iter()
            .filter(|s| s.front.is_busy())
            .map(|s| s.span.start)
            .collect();
        assert_eq!(busy, vec![630, 660]);
    }

    #[test]
    fn both_requires_each_half() {
        let grid = slot_grid(&[Span::new(600, 660)], &[Span::new(630, 690)]);
        let at = |m: Minute| grid.iter().find(|s| s.span.start == m).unwrap();
        assert!(!at(600).both);
        assert!(at(630).both);
        assert!(!at(660).both);
        assert_eq!(at(660).rear, SlotState::Busy);
    }

    #[test]
    fn outside_window_is_not_rendered() {
        let grid = slot_grid(&[Span::new(0, 540)], &[Span::new(1260, 1440)]);
        assert!(grid.iter().all(|s| !s.front.is_busy() && !s.rear.is_busy()));
    }

    #[test]
    fn merge_joins_adjacent() {
        let merged = merge_overlapping(&[
            Span::new(540, 600),
            Span::new(600, 630),
            Span::new(620, 700),
            Span::new(720, 780),
        ]);
        assert_eq!(merged, vec![Span::new(540, 700), Span::new(720, 780)]);
    }

    #[test]
    fn subtract_carves_holes() {
        let free = subtract_intervals(
            &[Span::new(540, 1260)],
            &[Span::new(600, 660), Span::new(1200, 1300)],
        );
        assert_eq!(free, vec![Span::new(540, 600), Span::new(660, 1200)]);
    }

    #[test]
    fn subtract_nothing_left() {
        let free = subtract_intervals(&[Span::new(600, 660)], &[Span::new(500, 700)]);
        assert!(free.is_empty());
    }
}
