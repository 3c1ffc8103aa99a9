//! Position smoothing and the host-visible report slots.
//!
//! The tracker's output is stable but raw; this stage smooths positions
//! per identity and lays the result out in a fixed array of report slots
//! so the host can index by slot. The stage is replaceable: the engine
//! depends only on [`FilterStage::filter_and_report`].

use crate::tracker::{MAX_TOUCHES, TOUCH_ID_MAX, TOUCH_ID_UNDEFINED, TouchRecord};

/// Sentinel position of an empty report slot.
pub const POSITION_NONE: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    None,
    /// First-order IIR: `(k * input + (256 - k) * previous) >> 8`.
    Iir,
    /// Median of the current and the two previous positions.
    Median,
    /// Mean of the current and the previous reported position.
    Average,
    /// Step at most one unit toward the current position.
    Jitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSlot {
    pub x: u16,
    pub y: u16,
    pub z: u8,
    pub id: u8,
}

impl ReportSlot {
    pub const EMPTY: Self = Self {
        x: POSITION_NONE,
        y: POSITION_NONE,
        z: 0,
        id: TOUCH_ID_UNDEFINED,
    };

    pub fn occupied(&self) -> bool {
        self.id <= TOUCH_ID_MAX
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MedianHistory {
    x1: u16,
    x2: u16,
    y1: u16,
    y2: u16,
}

enum Axis {
    X,
    Y,
}

pub struct FilterStage {
    kind: FilterKind,
    iir_coeff: u16,
    slots: [ReportSlot; MAX_TOUCHES],
    history: [MedianHistory; MAX_TOUCHES],
}

impl FilterStage {
    pub fn new(kind: FilterKind, iir_coeff: u8) -> Self {
        Self {
            kind,
            iir_coeff: u16::from(iir_coeff),
            slots: [ReportSlot::EMPTY; MAX_TOUCHES],
            history: [MedianHistory::default(); MAX_TOUCHES],
        }
    }

    pub fn slots(&self) -> &[ReportSlot; MAX_TOUCHES] {
        &self.slots
    }

    pub fn reset(&mut self) {
        self.slots = [ReportSlot::EMPTY; MAX_TOUCHES];
        self.history = [MedianHistory::default(); MAX_TOUCHES];
    }

    /// Lay the tracked touches out in the report slots, smoothing each
    /// reportable one (valid id, age above zero) against the previous
    /// report. An identity appearing for the first time passes through raw
    /// and seeds its history. Returns the number of occupied slots.
    pub fn filter_and_report(&mut self, touches: &[TouchRecord]) -> usize {
        let mut prev_id_mask = 0u8;
        for s in &self.slots {
            if s.occupied() {
                prev_id_mask |= 1 << s.id;
            }
        }
        let prev = self.slots;

        let mut reported = 0usize;
        for i in 0..MAX_TOUCHES {
            let Some(t) = touches.get(i).filter(|t| t.age > 0) else {
                self.slots[i] = ReportSlot::EMPTY;
                continue;
            };

            let (mut x, mut y) = (t.x, t.y);
            if self.kind != FilterKind::None {
                if prev_id_mask & (1 << t.id) == 0 {
                    self.history[i] = MedianHistory { x1: t.x, x2: t.x, y1: t.y, y2: t.y };
                } else if let Some(p) = prev.iter().find(|s| s.id == t.id) {
                    x = self.apply(t.x, p.x, i, Axis::X);
                    y = self.apply(t.y, p.y, i, Axis::Y);
                }
            }

            self.slots[i] = ReportSlot { x, y, z: t.z, id: t.id };
            reported += 1;
        }
        reported
    }

    fn apply(&mut self, input: u16, prev: u16, slot: usize, axis: Axis) -> u16 {
        match self.kind {
            FilterKind::None => input,
            FilterKind::Iir => iir_first_order(input, prev, self.iir_coeff),
            FilterKind::Average => ((u32::from(input) + u32::from(prev)) >> 1) as u16,
            FilterKind::Jitter => jitter_step(input, prev),
            FilterKind::Median => {
                let h = &mut self.history[slot];
                match axis {
                    Axis::X => {
                        let out = median3(h.x2, h.x1, input);
                        h.x2 = h.x1;
                        h.x1 = input;
                        out
                    }
                    Axis::Y => {
                        let out = median3(h.y2, h.y1, input);
                        h.y2 = h.y1;
                        h.y1 = input;
                        out
                    }
                }
            }
        }
    }
}

fn iir_first_order(input: u16, prev: u16, coeff: u16) -> u16 {
    ((u32::from(coeff) * u32::from(input) + (256 - u32::from(coeff)) * u32::from(prev)) >> 8) as u16
}

fn median3(a: u16, b: u16, c: u16) -> u16 {
    a.max(b).min(a.min(b).max(c))
}

fn jitter_step(input: u16, prev: u16) -> u16 {
    if input > prev {
        prev + 1
    } else if input < prev {
        prev - 1
    } else {
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::DebounceState;

    fn tracked(x: u16, y: u16, id: u8, age: u8) -> TouchRecord {
        TouchRecord {
            x,
            y,
            z: 40,
            magnitude: 90,
            id,
            age,
            state: DebounceState::Active,
        }
    }

    #[test]
    fn empty_slots_carry_the_sentinel() {
        let mut stage = FilterStage::new(FilterKind::None, 128);
        let reported = stage.filter_and_report(&[tracked(100, 200, 0, 1)]);
        assert_eq!(reported, 1);
        assert_eq!(stage.slots()[0], ReportSlot { x: 100, y: 200, z: 40, id: 0 });
        for slot in &stage.slots()[1..] {
            assert_eq!(*slot, ReportSlot::EMPTY);
            assert!(!slot.occupied());
        }
    }

    #[test]
    fn zero_age_touches_are_not_reported() {
        let mut stage = FilterStage::new(FilterKind::None, 128);
        let reported = stage.filter_and_report(&[tracked(100, 200, 0, 1), tracked(50, 50, 1, 0)]);
        assert_eq!(reported, 1);
        assert!(!stage.slots()[1].occupied());
    }

    #[test]
    fn first_report_passes_through_raw() {
        let mut stage = FilterStage::new(FilterKind::Iir, 128);
        stage.filter_and_report(&[tracked(100, 200, 0, 1)]);
        assert_eq!((stage.slots()[0].x, stage.slots()[0].y), (100, 200));
    }

    #[test]
    fn iir_blends_against_previous_report() {
        let mut stage = FilterStage::new(FilterKind::Iir, 128);
        stage.filter_and_report(&[tracked(100, 200, 0, 1)]);
        stage.filter_and_report(&[tracked(200, 100, 0, 2)]);
        // equal weights at coeff 128
        assert_eq!((stage.slots()[0].x, stage.slots()[0].y), (150, 150));
    }

    #[test]
    fn median_needs_two_cycles_of_history() {
        let mut stage = FilterStage::new(FilterKind::Median, 128);
        stage.filter_and_report(&[tracked(100, 100, 0, 1)]);
        stage.filter_and_report(&[tracked(300, 300, 0, 2)]);
        // history (100, 100) + input 300 -> 100
        assert_eq!(stage.slots()[0].x, 100);
        stage.filter_and_report(&[tracked(200, 200, 0, 3)]);
        // history (100, 300) + input 200 -> 200
        assert_eq!(stage.slots()[0].x, 200);
    }

    #[test]
    fn jitter_moves_one_unit_per_cycle() {
        let mut stage = FilterStage::new(FilterKind::Jitter, 128);
        stage.filter_and_report(&[tracked(100, 100, 0, 1)]);
        stage.filter_and_report(&[tracked(300, 20, 0, 2)]);
        assert_eq!((stage.slots()[0].x, stage.slots()[0].y), (101, 99));
    }

    #[test]
    fn history_reseeds_when_identity_changes() {
        let mut stage = FilterStage::new(FilterKind::Iir, 128);
        stage.filter_and_report(&[tracked(100, 100, 0, 1)]);
        // id 0 lifted, id 1 lands somewhere else entirely
        stage.filter_and_report(&[tracked(400, 400, 1, 1)]);
        assert_eq!((stage.slots()[0].x, stage.slots()[0].y), (400, 400));
    }
}
