//! Batch insertion of segments into a live interval.
//!
//! Inserting segments one by one with [`LiveInterval::add_segment`]
//! shifts the tail of the segment list on every call. The updater
//! amortizes a monotone batch (non-decreasing start points) to a
//! single linear merge. While dirty, the segment list is split into
//! three zones:
//!
//! 1. a finalized prefix `[0, write_i)`,
//! 2. spilled segments that did not fit in the gap, in `spills`,
//! 3. the unread suffix `[read_i, len)`.
//!
//! `write_i <= read_i`; all three zones are individually sorted and
//! coalesced; zone 1 and `spills` both precede and cannot coalesce
//! with zone 2. [`LiveRangeUpdater::flush`] merges the zones back into
//! one list; dropping the updater flushes.

use crate::interval::{LiveInterval, Segment, ValNo};
use crate::slots::SlotIndex;
use smallvec::SmallVec;

pub struct LiveRangeUpdater<'a> {
    li: &'a mut LiveInterval,
    last_start: SlotIndex,
    write_i: usize,
    read_i: usize,
    spills: SmallVec<[Segment; 8]>,
}

// Should `a` and `b` become one segment? `a` must start first.
fn coalescable(a: &Segment, b: &Segment) -> bool {
    debug_assert!(a.start <= b.start, "unordered segments");
    if a.end == b.start {
        return a.valno == b.valno;
    }
    if a.end < b.start {
        return false;
    }
    debug_assert_eq!(a.valno, b.valno, "cannot overlap different values");
    true
}

impl<'a> LiveRangeUpdater<'a> {
    pub fn new(li: &'a mut LiveInterval) -> Self {
        LiveRangeUpdater {
            li,
            last_start: SlotIndex::invalid(),
            write_i: 0,
            read_i: 0,
            spills: SmallVec::new(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.last_start.is_valid()
    }

    pub fn add(&mut self, start: SlotIndex, end: SlotIndex, valno: ValNo) {
        self.add_segment(Segment::new(start, end, valno));
    }

    pub fn add_segment(&mut self, mut seg: Segment) {
        // A backward jump ends the monotone batch: flush and restart.
        if !self.last_start.is_valid() || self.last_start > seg.start {
            if self.is_dirty() {
                self.flush();
            }
            debug_assert!(self.spills.is_empty(), "leftover spilled segments");
            self.write_i = 0;
            self.read_i = 0;
        }
        self.last_start = seg.start;

        // Advance read_i until it ends after seg.start.
        let len = self.li.segments.len();
        if self.read_i < len && self.li.segments[self.read_i].end <= seg.start {
            // First try to close the gap with spills.
            if self.read_i != self.write_i {
                self.merge_spills();
            }
            if self.read_i == self.write_i {
                let pos = self.li.find(seg.start);
                self.read_i = pos;
                self.write_i = pos;
            } else {
                while self.read_i < len && self.li.segments[self.read_i].end <= seg.start {
                    self.li.segments[self.write_i] = self.li.segments[self.read_i];
                    self.write_i += 1;
                    self.read_i += 1;
                }
            }
        }

        debug_assert!(self.read_i >= len || self.li.segments[self.read_i].end > seg.start);

        // Does the segment at read_i begin before seg?
        if self.read_i < len && self.li.segments[self.read_i].start <= seg.start {
            debug_assert_eq!(
                self.li.segments[self.read_i].valno, seg.valno,
                "cannot overlap different values"
            );
            // Nothing to do if seg is entirely contained.
            if self.li.segments[self.read_i].end >= seg.end {
                return;
            }
            seg.start = self.li.segments[self.read_i].start;
            self.read_i += 1;
        }

        // Coalesce as much as possible from the unread zone into seg.
        while self.read_i < len && coalescable(&seg, &self.li.segments[self.read_i]) {
            seg.end = seg.end.max(self.li.segments[self.read_i].end);
            self.read_i += 1;
        }

        // Try coalescing the last spill into seg.
        if let Some(&last) = self.spills.last() {
            if coalescable(&last, &seg) {
                seg.start = last.start;
                seg.end = seg.end.max(last.end);
                self.spills.pop();
            }
        }

        // Try coalescing seg onto the finalized tail.
        if self.write_i > 0 {
            let prev = self.li.segments[self.write_i - 1];
            if coalescable(&prev, &seg) {
                self.li.segments[self.write_i - 1].end = prev.end.max(seg.end);
                return;
            }
        }

        // No coalescing; the segment has to go somewhere.
        if self.write_i != self.read_i {
            self.li.segments[self.write_i] = seg;
            self.write_i += 1;
            return;
        }
        if self.write_i == self.li.segments.len() {
            self.li.segments.push(seg);
            self.write_i = self.li.segments.len();
            self.read_i = self.write_i;
        } else {
            self.spills.push(seg);
        }
    }

    // Backward-merge as many spills as fit into the gap between
    // write_i and read_i, advancing write_i accordingly.
    fn merge_spills(&mut self) {
        let gap = self.read_i - self.write_i;
        let num_moved = self.spills.len().min(gap);
        let mut src = self.write_i;
        let mut dst = src + num_moved;
        let mut spill_src = self.spills.len();

        self.write_i = dst;

        while src != dst {
            if src > 0 && self.li.segments[src - 1].start > self.spills[spill_src - 1].start {
                src -= 1;
                dst -= 1;
                self.li.segments[dst] = self.li.segments[src];
            } else {
                spill_src -= 1;
                dst -= 1;
                self.li.segments[dst] = self.spills[spill_src];
            }
        }
        debug_assert_eq!(num_moved, self.spills.len() - spill_src);
        self.spills.truncate(spill_src);
    }

    /// Merge the three zones back into one sorted, coalesced list.
    pub fn flush(&mut self) {
        if !self.is_dirty() {
            return;
        }
        self.last_start = SlotIndex::invalid();

        if self.spills.is_empty() {
            self.li.segments.drain(self.write_i..self.read_i);
            if cfg!(debug_assertions) {
                self.li.verify();
            }
            return;
        }

        // Resize the gap to exactly fit the spills.
        let gap = self.read_i - self.write_i;
        if gap < self.spills.len() {
            let filler = Segment {
                start: SlotIndex::invalid(),
                end: SlotIndex::invalid(),
                valno: ValNo::invalid(),
            };
            self.li.segments.insert_many(
                self.read_i,
                std::iter::repeat(filler).take(self.spills.len() - gap),
            );
        } else {
            self.li
                .segments
                .drain(self.write_i + self.spills.len()..self.read_i);
        }
        self.read_i = self.write_i + self.spills.len();
        self.merge_spills();
        if cfg!(debug_assertions) {
            self.li.verify();
        }
    }
}

impl<'a> Drop for LiveRangeUpdater<'a> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::Inst;
    use crate::slots::Slot;
    use crate::{RegClass, VReg};

    fn r(inst: usize) -> SlotIndex {
        SlotIndex::new(Inst::new(inst), Slot::Register)
    }

    fn li() -> LiveInterval {
        LiveInterval::new(VReg::new(0, RegClass::Int))
    }

    // Mirror a batch of adds with one-at-a-time insertion; both must
    // produce the same interval.
    fn check_equivalence(existing: &[(usize, usize)], adds: &[(usize, usize)]) {
        let mut a = li();
        let va = a.get_next_value(r(existing.first().map_or(0, |&(s, _)| s)));
        for &(s, e) in existing {
            a.add_segment(Segment::new(r(s), r(e), va));
        }
        let mut b = a.clone();

        {
            let mut updater = LiveRangeUpdater::new(&mut a);
            for &(s, e) in adds {
                updater.add(r(s), r(e), va);
            }
        }
        for &(s, e) in adds {
            b.add_segment(Segment::new(r(s), r(e), va));
        }

        a.verify();
        b.verify();
        assert_eq!(a.segments(), b.segments());
    }

    #[test]
    fn monotone_batch_matches_single_adds() {
        check_equivalence(&[], &[(0, 2), (4, 6), (8, 10)]);
        check_equivalence(&[], &[(0, 2), (2, 4), (4, 6)]);
        check_equivalence(&[(0, 2), (8, 10)], &[(1, 3), (3, 9)]);
        check_equivalence(&[(0, 2), (4, 6), (8, 10), (12, 14)], &[(3, 4), (11, 12)]);
        check_equivalence(&[(4, 6)], &[(0, 1), (2, 3), (7, 8)]);
    }

    #[test]
    fn backward_start_flushes_and_restarts() {
        check_equivalence(&[(10, 12)], &[(14, 16), (0, 2), (4, 6)]);
    }

    #[test]
    fn contained_segments_are_absorbed() {
        check_equivalence(&[(0, 20)], &[(2, 4), (6, 8), (10, 12)]);
    }

    #[test]
    fn spill_buffer_merges_on_flush() {
        // Many small inserts in front of existing segments force the
        // spill path (no gap to write into).
        check_equivalence(
            &[(10, 11), (20, 21), (30, 31)],
            &[(0, 1), (2, 3), (4, 5), (6, 7), (12, 13), (14, 15)],
        );
    }

    #[test]
    fn updater_is_clean_after_flush() {
        let mut iv = li();
        let v = iv.get_next_value(r(0));
        let mut updater = LiveRangeUpdater::new(&mut iv);
        assert!(!updater.is_dirty());
        updater.add(r(0), r(2), v);
        assert!(updater.is_dirty());
        updater.flush();
        assert!(!updater.is_dirty());
        drop(updater);
        assert_eq!(iv.segments().len(), 1);
    }
}
