//! Multi-touch lifecycle: correspondence, identity, debounce, compaction.
//!
//! One [`TouchTracker`] per touchpad widget owns the only cross-cycle state
//! in the core: the touch set retained from the previous scan. Each cycle
//! reconciles the freshly detected touches against it, keeps identities
//! stable for plausible continuations and hands out fresh ones otherwise.

use heapless::Vec;

use crate::assign::{self, DistanceMap, Scratch};
use crate::detect::MAX_PAD_PEAKS;

/// Most simultaneous touches a touchpad tracks; also the report capacity.
pub const MAX_TOUCHES: usize = MAX_PAD_PEAKS;
/// Highest valid touch identity.
pub const TOUCH_ID_MAX: u8 = (MAX_TOUCHES - 1) as u8;
/// Identity of a record not yet reconciled this cycle.
pub const TOUCH_ID_UNDEFINED: u8 = 0x80;
/// Identity of a record that failed the on-threshold check.
pub const TOUCH_ID_ON_FAIL: u8 = 0x81;
/// Identity handed out when every slot is taken; the record is compacted
/// away instead of corrupting a live identity.
pub const TOUCH_ID_ABSENT: u8 = 0x82;

/// Where a touch stands in its debounce life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebounceState {
    #[default]
    Idle,
    /// Newly seen; invisible to reporting until the countdown ends.
    TouchDown(u8),
    Active,
    /// Gone from the scan but still reported until the countdown ends.
    LiftOff(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchRecord {
    pub x: u16,
    pub y: u16,
    pub z: u8,
    /// Center difference of the source peak, checked against the
    /// on-threshold when the touch is admitted.
    pub magnitude: u16,
    pub id: u8,
    /// Consecutive active cycles; zero means not reportable.
    pub age: u8,
    pub state: DebounceState,
}

impl Default for TouchRecord {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            magnitude: 0,
            id: TOUCH_ID_UNDEFINED,
            age: 0,
            state: DebounceState::Idle,
        }
    }
}

pub type TouchSet = Vec<TouchRecord, MAX_TOUCHES>;

/// Per-widget tracking thresholds, supplied by the configuration layer.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub finger_threshold: u16,
    pub hysteresis: u16,
    /// Touch-down debounce ticks; 0 accepts a touch on its first scan.
    pub on_debounce: u8,
    /// Lift-off debounce ticks; `None` drops vanished touches immediately.
    pub off_debounce: Option<u8>,
    /// Largest squared jump a touch may make between scans and still keep
    /// its identity.
    pub velocity: u32,
}

/// Owns the cross-cycle touch state of one touchpad widget.
pub struct TouchTracker {
    old: TouchSet,
    map: DistanceMap,
    scratch: Scratch,
}

impl TouchTracker {
    pub fn new() -> Self {
        Self {
            old: Vec::new(),
            map: DistanceMap::new(),
            scratch: Scratch::new(),
        }
    }

    /// Touches retained from the last completed cycle, age-sorted.
    pub fn touches(&self) -> &[TouchRecord] {
        &self.old
    }

    /// Forget all cross-cycle state (controller re-initialization).
    pub fn reset(&mut self) {
        self.old.clear();
    }

    /// Run one reconciliation cycle. `new` arrives straight from the
    /// centroid stage; it leaves compacted and age-sorted, and is retained
    /// as the next cycle's old set.
    pub fn track(&mut self, new: &mut TouchSet, cfg: &TrackerConfig) {
        if new.is_empty() && self.old.is_empty() {
            return;
        }

        let old_ids = id_mask(&self.old);
        let mut new_ids = 0u8;
        let on_threshold = cfg.finger_threshold.saturating_add(cfg.hysteresis);

        if !new.is_empty() {
            for t in new.iter_mut() {
                t.id = TOUCH_ID_UNDEFINED;
            }

            if self.old.is_empty() {
                for t in new.iter_mut() {
                    admit(t, old_ids, &mut new_ids, on_threshold, cfg.on_debounce);
                }
            } else if new.len() >= self.old.len() {
                let mut matched_row = [0u8; MAX_TOUCHES];
                if new.len() == 1 && self.old.len() == 1 {
                    // nothing to solve one-on-one
                    matched_row[0] = 0;
                } else {
                    fill_distance_map(&mut self.map, new, &self.old);
                    assign::solve(
                        &self.map,
                        new.len(),
                        self.old.len(),
                        &mut self.scratch,
                        &mut matched_row,
                    );
                }
                for oi in 0..self.old.len() {
                    let ni = usize::from(matched_row[oi]);
                    if squared_distance(&new[ni], &self.old[oi]) > cfg.velocity {
                        // implausible jump: this is a different finger
                        admit(&mut new[ni], old_ids, &mut new_ids, on_threshold, cfg.on_debounce);
                    } else {
                        new_ids |= 1 << self.old[oi].id;
                        continue_touch(&mut new[ni], &self.old[oi]);
                    }
                }
                if new.len() > self.old.len() {
                    for t in new.iter_mut() {
                        if t.id == TOUCH_ID_UNDEFINED {
                            admit(t, old_ids, &mut new_ids, on_threshold, cfg.on_debounce);
                        }
                    }
                }
            } else {
                let mut matched_row = [0u8; MAX_TOUCHES];
                fill_distance_map(&mut self.map, new, &self.old);
                assign::solve(
                    &self.map,
                    self.old.len(),
                    new.len(),
                    &mut self.scratch,
                    &mut matched_row,
                );
                for ni in 0..new.len() {
                    let oi = usize::from(matched_row[ni]);
                    if squared_distance(&new[ni], &self.old[oi]) > cfg.velocity {
                        admit(&mut new[ni], old_ids, &mut new_ids, on_threshold, cfg.on_debounce);
                    } else {
                        new_ids |= 1 << self.old[oi].id;
                        continue_touch(&mut new[ni], &self.old[oi]);
                    }
                }
            }

            touch_down_debounce(new);
        }

        if let Some(off_ticks) = cfg.off_debounce {
            self.lift_off_debounce(new, old_ids, new_ids, off_ticks);
        }

        // compaction: drop rejected records, keep the rest in order; the
        // following sort key (age desc, id asc) is total over valid
        // records, so the compaction order cannot leak into the result
        new.retain(|t| t.id <= TOUCH_ID_MAX);
        new.as_mut_slice()
            .sort_unstable_by(|a, b| b.age.cmp(&a.age).then(a.id.cmp(&b.id)));

        self.old = new.clone();
    }

    /// A touch active last cycle but absent from this one is held at its
    /// last position until the lift-off countdown ends, as long as the new
    /// set has room and the touch was not still in touch-down debounce.
    fn lift_off_debounce(&mut self, new: &mut TouchSet, old_ids: u8, new_ids: u8, off_ticks: u8) {
        let lifted = old_ids & !new_ids;
        if lifted == 0 {
            return;
        }
        for old in self.old.iter() {
            if old.id > TOUCH_ID_MAX || lifted & (1 << old.id) == 0 {
                continue;
            }
            if new.is_full() || matches!(old.state, DebounceState::TouchDown(_)) {
                continue;
            }
            match old.state {
                // countdown already exhausted: the touch finally drops out
                DebounceState::LiftOff(0) => {}
                DebounceState::LiftOff(ticks) => {
                    let mut held = *old;
                    held.state = DebounceState::LiftOff(ticks - 1);
                    let _ = new.push(held);
                }
                _ => {
                    // first absent cycle: hold position, freeze age
                    let mut held = *old;
                    held.state = DebounceState::LiftOff(off_ticks.saturating_sub(1));
                    let _ = new.push(held);
                }
            }
        }
    }
}

impl Default for TouchTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Admit a record as a fresh touch: reject it when the peak magnitude is
/// below `finger_threshold + hysteresis`, otherwise allocate the lowest
/// identity free in both the old and new sets and start the touch-down
/// countdown.
fn admit(t: &mut TouchRecord, old_ids: u8, new_ids: &mut u8, on_threshold: u16, on_debounce: u8) {
    if t.magnitude < on_threshold {
        t.id = TOUCH_ID_ON_FAIL;
        return;
    }
    let id = lowest_free_id(old_ids | *new_ids);
    if id <= TOUCH_ID_MAX {
        *new_ids |= 1 << id;
    }
    t.id = id;
    t.age = 1;
    t.state = DebounceState::TouchDown(on_debounce);
}

/// Carry a surviving touch over: same identity, one cycle older, debounce
/// countdown advanced.
fn continue_touch(t: &mut TouchRecord, prev: &TouchRecord) {
    t.id = prev.id;
    t.age = prev.age.saturating_add(1);
    t.state = match prev.state {
        DebounceState::TouchDown(ticks) if ticks > 0 => DebounceState::TouchDown(ticks - 1),
        DebounceState::LiftOff(ticks) if ticks > 0 => DebounceState::LiftOff(ticks - 1),
        s => s,
    };
}

/// A touch still counting down its touch-down debounce exists internally
/// but reports age zero; once the countdown ends it becomes fully active.
fn touch_down_debounce(new: &mut TouchSet) {
    for t in new.iter_mut() {
        if let DebounceState::TouchDown(ticks) = t.state {
            if ticks <= 1 {
                t.state = DebounceState::Active;
            } else {
                t.age = 0;
            }
        }
    }
}

fn lowest_free_id(mask: u8) -> u8 {
    for id in 0..=TOUCH_ID_MAX {
        if mask & (1 << id) == 0 {
            return id;
        }
    }
    TOUCH_ID_ABSENT
}

fn id_mask(set: &[TouchRecord]) -> u8 {
    let mut mask = 0u8;
    for t in set {
        if t.id <= TOUCH_ID_MAX {
            mask |= 1 << t.id;
        }
    }
    mask
}

pub fn squared_distance(a: &TouchRecord, b: &TouchRecord) -> u32 {
    let dx = i32::from(a.x) - i32::from(b.x);
    let dy = i32::from(a.y) - i32::from(b.y);
    (dx * dx + dy * dy) as u32
}

fn fill_distance_map(map: &mut DistanceMap, new: &TouchSet, old: &TouchSet) {
    if new.len() >= old.len() {
        for (i, n) in new.iter().enumerate() {
            for (j, o) in old.iter().enumerate() {
                map.0[i][j] = squared_distance(n, o) as i32;
            }
        }
    } else {
        for (i, o) in old.iter().enumerate() {
            for (j, n) in new.iter().enumerate() {
                map.0[i][j] = squared_distance(n, o) as i32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TrackerConfig {
        TrackerConfig {
            finger_threshold: 40,
            hysteresis: 10,
            on_debounce: 0,
            off_debounce: None,
            velocity: 2500,
        }
    }

    fn touch(x: u16, y: u16, magnitude: u16) -> TouchRecord {
        TouchRecord { x, y, magnitude, ..TouchRecord::default() }
    }

    fn set(touches: &[TouchRecord]) -> TouchSet {
        let mut s = TouchSet::new();
        for &t in touches {
            s.push(t).unwrap();
        }
        s
    }

    fn ids(tracker: &TouchTracker) -> std::vec::Vec<u8> {
        tracker.touches().iter().map(|t| t.id).collect()
    }

    fn assert_ids_unique(tracker: &TouchTracker) {
        let mut mask = 0u8;
        for t in tracker.touches() {
            assert!(t.id <= TOUCH_ID_MAX);
            assert_eq!(mask & (1 << t.id), 0, "duplicate id {}", t.id);
            mask |= 1 << t.id;
        }
    }

    #[test]
    fn empty_cycles_do_nothing() {
        let mut tracker = TouchTracker::new();
        let mut new = TouchSet::new();
        tracker.track(&mut new, &cfg());
        assert!(tracker.touches().is_empty());
    }

    #[test]
    fn fresh_touches_get_lowest_ids() {
        let mut tracker = TouchTracker::new();
        let mut new = set(&[touch(10, 10, 90), touch(200, 200, 90)]);
        tracker.track(&mut new, &cfg());
        assert_eq!(ids(&tracker), [0, 1]);
        assert!(tracker.touches().iter().all(|t| t.age == 1));
    }

    #[test]
    fn identities_follow_moving_touches() {
        // two touches drift a little every cycle and keep both their
        // identities and growing ages, whatever order they arrive in
        let mut tracker = TouchTracker::new();
        let mut new = set(&[touch(10, 10, 90), touch(200, 200, 90)]);
        tracker.track(&mut new, &cfg());

        for step in 1..=4u16 {
            let d = step * 5;
            let mut new = set(&[touch(200 + d, 200, 90), touch(10 + d, 10, 90)]);
            tracker.track(&mut new, &cfg());
            assert_ids_unique(&tracker);
            let near = tracker.touches().iter().find(|t| t.x < 100).unwrap();
            let far = tracker.touches().iter().find(|t| t.x >= 200).unwrap();
            assert_eq!(near.id, 0);
            assert_eq!(far.id, 1);
            assert_eq!(near.age, 1 + step as u8);
            assert_eq!(far.age, 1 + step as u8);
        }
    }

    #[test]
    fn implausible_jump_breaks_identity() {
        let mut tracker = TouchTracker::new();
        let mut new = set(&[touch(10, 10, 90)]);
        tracker.track(&mut new, &cfg());
        assert_eq!(ids(&tracker), [0]);

        // 100 units is way past sqrt(2500)
        let mut new = set(&[touch(110, 110, 90)]);
        tracker.track(&mut new, &cfg());
        // old id 0 is still blocked this cycle, so the new finger gets 1
        assert_eq!(ids(&tracker), [1]);
        assert_eq!(tracker.touches()[0].age, 1);

        // one cycle later id 0 is free for reuse
        let mut new = set(&[touch(111, 111, 90), touch(300, 300, 90)]);
        tracker.track(&mut new, &cfg());
        assert_ids_unique(&tracker);
        let far = tracker.touches().iter().find(|t| t.x == 300).unwrap();
        assert_eq!(far.id, 0);
    }

    #[test]
    fn below_on_threshold_is_rejected() {
        let mut tracker = TouchTracker::new();
        // 45 clears detection but not finger_threshold + hysteresis
        let mut new = set(&[touch(10, 10, 45), touch(100, 100, 90)]);
        tracker.track(&mut new, &cfg());
        assert_eq!(ids(&tracker), [0]);
        assert_eq!(tracker.touches()[0].x, 100);
    }

    #[test]
    fn rejected_records_compact_away_in_order() {
        let mut tracker = TouchTracker::new();
        let mut new = set(&[
            touch(10, 10, 90),
            touch(50, 50, 45),
            touch(100, 100, 90),
            touch(150, 150, 45),
            touch(200, 200, 90),
        ]);
        tracker.track(&mut new, &cfg());
        // survivors share age 1, so order falls back to ascending id
        assert_eq!(ids(&tracker), [0, 1, 2]);
        let xs: std::vec::Vec<u16> = tracker.touches().iter().map(|t| t.x).collect();
        assert_eq!(xs, [10, 100, 200]);
    }

    #[test]
    fn touch_down_debounce_hides_young_touches() {
        let mut tracker = TouchTracker::new();
        let cfg = TrackerConfig { on_debounce: 2, ..cfg() };

        let mut new = set(&[touch(10, 10, 90)]);
        tracker.track(&mut new, &cfg);
        let t = tracker.touches()[0];
        assert_eq!(t.age, 0);
        assert_eq!(t.state, DebounceState::TouchDown(2));

        let mut new = set(&[touch(12, 10, 90)]);
        tracker.track(&mut new, &cfg);
        let t = tracker.touches()[0];
        assert_eq!(t.age, 1);
        assert_eq!(t.state, DebounceState::Active);
    }

    #[test]
    fn lift_off_debounce_holds_vanished_touch() {
        // a touch present in cycle N vanishes; with a 3-tick lift-off
        // counter it stays reported for three more cycles and is gone on
        // the fourth
        let mut tracker = TouchTracker::new();
        let cfg = TrackerConfig { off_debounce: Some(3), ..cfg() };

        let mut new = set(&[touch(80, 80, 90)]);
        tracker.track(&mut new, &cfg);
        assert_eq!(tracker.touches().len(), 1);
        let age_before = tracker.touches()[0].age;

        for expected_ticks in [2u8, 1, 0] {
            let mut new = TouchSet::new();
            tracker.track(&mut new, &cfg);
            let t = tracker.touches()[0];
            assert_eq!(t.state, DebounceState::LiftOff(expected_ticks));
            assert_eq!((t.x, t.y), (80, 80));
            assert_eq!(t.age, age_before, "age must stay frozen during lift-off");
        }

        let mut new = TouchSet::new();
        tracker.track(&mut new, &cfg);
        assert!(tracker.touches().is_empty());
    }

    #[test]
    fn lift_off_resumes_when_touch_returns() {
        let mut tracker = TouchTracker::new();
        let cfg = TrackerConfig { off_debounce: Some(3), ..cfg() };

        let mut new = set(&[touch(80, 80, 90)]);
        tracker.track(&mut new, &cfg);

        let mut new = TouchSet::new();
        tracker.track(&mut new, &cfg);
        assert_eq!(tracker.touches()[0].state, DebounceState::LiftOff(2));

        // finger comes back close to the held position and keeps its id
        let mut new = set(&[touch(82, 80, 90)]);
        tracker.track(&mut new, &cfg);
        assert_eq!(tracker.touches()[0].id, 0);
        assert!(tracker.touches()[0].age >= 1);
    }

    #[test]
    fn identity_exhaustion_drops_excess_touches() {
        // three touches lift off and hold their identities while five new
        // fingers land far away: only two identities remain, the excess is
        // compacted out without corrupting the survivors
        let mut tracker = TouchTracker::new();
        let cfg = TrackerConfig { off_debounce: Some(3), velocity: 25, ..cfg() };

        let mut new = set(&[touch(0, 0, 90), touch(500, 0, 90), touch(0, 500, 90)]);
        tracker.track(&mut new, &cfg);
        assert_eq!(ids(&tracker), [0, 1, 2]);

        let mut new = set(&[
            touch(1000, 1000, 90),
            touch(1200, 1000, 90),
            touch(1000, 1200, 90),
            touch(1200, 1200, 90),
            touch(1100, 1100, 90),
        ]);
        tracker.track(&mut new, &cfg);
        assert_ids_unique(&tracker);
        let valid = ids(&tracker);
        assert_eq!(valid.len(), 2);
        assert!(valid.contains(&3) && valid.contains(&4));
    }

    #[test]
    fn shrinking_set_keeps_nearest_identity() {
        let mut tracker = TouchTracker::new();
        let mut new = set(&[touch(10, 10, 90), touch(200, 200, 90), touch(400, 400, 90)]);
        tracker.track(&mut new, &cfg());
        assert_eq!(tracker.touches().len(), 3);

        // only the middle finger stays down
        let mut new = set(&[touch(205, 203, 90)]);
        tracker.track(&mut new, &cfg());
        assert_eq!(tracker.touches().len(), 1);
        assert_eq!(tracker.touches()[0].id, 1);
        assert_eq!(tracker.touches()[0].age, 2);
    }

    #[test]
    fn ages_sort_older_touches_first() {
        let mut tracker = TouchTracker::new();
        let mut new = set(&[touch(10, 10, 90)]);
        tracker.track(&mut new, &cfg());

        let mut new = set(&[touch(12, 10, 90), touch(300, 300, 90)]);
        tracker.track(&mut new, &cfg());
        let t = tracker.touches();
        assert_eq!(t[0].id, 0);
        assert_eq!(t[0].age, 2);
        assert_eq!(t[1].id, 1);
        assert_eq!(t[1].age, 1);
    }

    #[test]
    fn no_identity_is_shared_across_a_noisy_sequence() {
        let mut tracker = TouchTracker::new();
        let cfg = TrackerConfig { off_debounce: Some(2), ..cfg() };
        let frames: [&[TouchRecord]; 6] = [
            &[touch(10, 10, 90)],
            &[touch(14, 12, 90), touch(300, 300, 90)],
            &[touch(18, 14, 90), touch(305, 303, 90), touch(600, 50, 90)],
            &[touch(308, 306, 90), touch(604, 52, 90)],
            &[touch(310, 308, 90)],
            &[],
        ];
        for frame in frames {
            let mut new = set(frame);
            tracker.track(&mut new, &cfg);
            assert_ids_unique(&tracker);
        }
    }
}
