//! Interference tracking between assigned intervals and candidate
//! registers.
//!
//! Each physical register keeps its committed segments in a BTreeMap
//! whose keys compare `Equal` when they overlap, so a lookup with a
//! candidate range lands on the first conflicting entry directly.
//! Fixed reservations (clobbers from calls and the like) live in the
//! same map, tagged with the invalid virtual register.

use crate::interval::LiveInterval;
use crate::slots::SlotIndex;
use crate::{PReg, VReg};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// A key in the committed map. Ordering treats overlapping ranges as
/// equal, which must never coexist in one map; assignment is only
/// legal when no interference remains.
#[derive(Clone, Copy, Debug)]
pub struct UnionKey {
    pub from: u32,
    pub to: u32,
}

impl UnionKey {
    #[inline(always)]
    pub fn from_range(start: SlotIndex, end: SlotIndex) -> Self {
        UnionKey {
            from: start.raw_u32(),
            to: end.raw_u32(),
        }
    }
}

impl std::cmp::PartialEq for UnionKey {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.to > other.from && self.from < other.to
    }
}
impl std::cmp::Eq for UnionKey {}
impl std::cmp::Ord for UnionKey {
    #[inline(always)]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.to <= other.from {
            std::cmp::Ordering::Less
        } else if self.from >= other.to {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    }
}
impl std::cmp::PartialOrd for UnionKey {
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterferenceKind {
    /// The register is free over the whole interval.
    None,
    /// At least one assigned virtual register is in the way; eviction
    /// may help.
    VirtReg,
    /// A fixed reservation is in the way; eviction cannot help.
    RegMask,
}

/// The committed segments of one physical register.
#[derive(Clone, Debug, Default)]
pub struct LiveIntervalUnion {
    segments: BTreeMap<UnionKey, VReg>,
}

impl LiveIntervalUnion {
    pub fn unify(&mut self, li: &LiveInterval) {
        for seg in li.segments() {
            let prev = self
                .segments
                .insert(UnionKey::from_range(seg.start, seg.end), li.reg);
            debug_assert!(prev.is_none(), "overlapping segment committed");
        }
    }

    pub fn extract(&mut self, li: &LiveInterval) {
        for seg in li.segments() {
            let prev = self
                .segments
                .remove(&UnionKey::from_range(seg.start, seg.end));
            debug_assert_eq!(prev, Some(li.reg));
        }
    }

    pub fn add_fixed(&mut self, start: SlotIndex, end: SlotIndex) {
        self.segments
            .insert(UnionKey::from_range(start, end), VReg::invalid());
    }

    pub fn is_free_within(&self, start: SlotIndex, end: SlotIndex) -> bool {
        !self
            .segments
            .contains_key(&UnionKey::from_range(start, end))
    }

    /// Walk all committed entries overlapping `li`.
    fn for_each_overlap(&self, li: &LiveInterval, mut f: impl FnMut(VReg) -> bool) {
        for seg in li.segments() {
            let key = UnionKey::from_range(seg.start, seg.end);
            for (k, &vreg) in self.segments.range(key..) {
                if k.from >= seg.end.raw_u32() {
                    break;
                }
                if !f(vreg) {
                    return;
                }
            }
        }
    }
}

/// All committed assignments plus the virtual-to-physical shadow map.
#[derive(Clone, Debug)]
pub struct LiveRegMatrix {
    unions: Vec<LiveIntervalUnion>,
    assignment: Vec<PReg>,
}

impl LiveRegMatrix {
    pub fn new(num_vregs: usize) -> Self {
        LiveRegMatrix {
            unions: (0..PReg::NUM_INDEX)
                .map(|_| LiveIntervalUnion::default())
                .collect(),
            assignment: vec![PReg::invalid(); num_vregs],
        }
    }

    /// Make room for registers created after construction.
    pub fn grow(&mut self, num_vregs: usize) {
        if num_vregs > self.assignment.len() {
            self.assignment.resize(num_vregs, PReg::invalid());
        }
    }

    /// Reserve `[start, end)` of `preg` for a fixed use.
    pub fn add_fixed(&mut self, preg: PReg, start: SlotIndex, end: SlotIndex) {
        self.unions[preg.index()].add_fixed(start, end);
    }

    pub fn assign(&mut self, li: &LiveInterval, preg: PReg) {
        trace!("assigning {} to {}", li.reg, preg);
        debug_assert_eq!(
            self.check_interference(li, preg),
            InterferenceKind::None,
            "assigning with interference present"
        );
        debug_assert!(!self.assignment[li.reg.vreg()].is_valid());
        self.unions[preg.index()].unify(li);
        self.assignment[li.reg.vreg()] = preg;
    }

    /// Remove a committed interval; returns the register it held.
    pub fn unassign(&mut self, li: &LiveInterval) -> PReg {
        let preg = self.assignment[li.reg.vreg()];
        debug_assert!(preg.is_valid(), "unassigning an unassigned interval");
        trace!("unassigning {} from {}", li.reg, preg);
        self.unions[preg.index()].extract(li);
        self.assignment[li.reg.vreg()] = PReg::invalid();
        preg
    }

    pub fn preg_of(&self, vreg: VReg) -> PReg {
        self.assignment[vreg.vreg()]
    }

    pub fn is_assigned(&self, vreg: VReg) -> bool {
        self.assignment[vreg.vreg()].is_valid()
    }

    /// Is `preg` entirely uncommitted over `[start, end)`?
    pub fn is_free_within(&self, preg: PReg, start: SlotIndex, end: SlotIndex) -> bool {
        self.unions[preg.index()].is_free_within(start, end)
    }

    /// The distinct assigned registers committed to `preg` within
    /// `[start, end)`, plus whether a fixed reservation intrudes.
    pub fn interference_in(
        &self,
        preg: PReg,
        start: SlotIndex,
        end: SlotIndex,
    ) -> (SmallVec<[VReg; 4]>, bool) {
        let mut vregs: SmallVec<[VReg; 4]> = SmallVec::new();
        let mut fixed = false;
        let key = UnionKey::from_range(start, end);
        for (k, &vreg) in self.unions[preg.index()].segments.range(key..) {
            if k.from >= end.raw_u32() {
                break;
            }
            if !vreg.is_valid() {
                fixed = true;
            } else if !vregs.contains(&vreg) {
                vregs.push(vreg);
            }
        }
        (vregs, fixed)
    }

    /// Cheapest-first classification of what stands between `li` and
    /// `preg`.
    pub fn check_interference(&self, li: &LiveInterval, preg: PReg) -> InterferenceKind {
        let mut kind = InterferenceKind::None;
        self.unions[preg.index()].for_each_overlap(li, |vreg| {
            if vreg.is_valid() {
                if kind == InterferenceKind::None {
                    kind = InterferenceKind::VirtReg;
                }
                true
            } else {
                kind = InterferenceKind::RegMask;
                false
            }
        });
        kind
    }

    /// Collect the distinct assigned registers interfering with `li`
    /// on `preg`, stopping after `limit`. Returns the set and whether
    /// it was cut off.
    pub fn collect_interfering_vregs(
        &self,
        li: &LiveInterval,
        preg: PReg,
        limit: usize,
    ) -> (SmallVec<[VReg; 8]>, bool) {
        let mut vregs: SmallVec<[VReg; 8]> = SmallVec::new();
        let mut cut_off = false;
        self.unions[preg.index()].for_each_overlap(li, |vreg| {
            if !vreg.is_valid() {
                // Fixed reservations are not evictable and not
                // reported here.
                return true;
            }
            if !vregs.contains(&vreg) {
                if vregs.len() == limit {
                    cut_off = true;
                    return false;
                }
                vregs.push(vreg);
            }
            true
        });
        (vregs, cut_off)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::Inst;
    use crate::interval::Segment;
    use crate::slots::Slot;
    use crate::RegClass;

    fn r(inst: usize) -> SlotIndex {
        SlotIndex::new(Inst::new(inst), Slot::Register)
    }

    fn interval(vreg: usize, ranges: &[(usize, usize)]) -> LiveInterval {
        let mut li = LiveInterval::new(VReg::new(vreg, RegClass::Int));
        let v = li.get_next_value(r(ranges[0].0));
        for &(s, e) in ranges {
            li.add_segment(Segment::new(r(s), r(e), v));
        }
        li
    }

    #[test]
    fn overlap_keys_compare_equal() {
        let a = UnionKey::from_range(r(0), r(4));
        let b = UnionKey::from_range(r(2), r(6));
        let c = UnionKey::from_range(r(4), r(8));
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
        assert_eq!(a.cmp(&c), std::cmp::Ordering::Less);
        assert_eq!(c.cmp(&a), std::cmp::Ordering::Greater);
    }

    #[test]
    fn assign_and_interference() {
        let preg = PReg::new(0, RegClass::Int);
        let other = PReg::new(1, RegClass::Int);
        let mut matrix = LiveRegMatrix::new(4);

        let a = interval(0, &[(0, 4), (8, 12)]);
        matrix.assign(&a, preg);
        assert_eq!(matrix.preg_of(a.reg), preg);

        let b = interval(1, &[(2, 6)]);
        assert_eq!(
            matrix.check_interference(&b, preg),
            InterferenceKind::VirtReg
        );
        assert_eq!(matrix.check_interference(&b, other), InterferenceKind::None);

        // The hole [4, 8) is free.
        let c = interval(2, &[(4, 8)]);
        assert_eq!(matrix.check_interference(&c, preg), InterferenceKind::None);
        matrix.assign(&c, preg);

        let (vregs, cut) = matrix.collect_interfering_vregs(&interval(3, &[(0, 12)]), preg, 10);
        assert!(!cut);
        assert_eq!(vregs.len(), 2);

        matrix.unassign(&a);
        assert_eq!(
            matrix.check_interference(&b, preg),
            InterferenceKind::None
        );
    }

    #[test]
    fn fixed_reservations_report_regmask() {
        let preg = PReg::new(0, RegClass::Int);
        let mut matrix = LiveRegMatrix::new(2);
        matrix.add_fixed(preg, r(3), r(4));

        let li = interval(0, &[(0, 6)]);
        assert_eq!(
            matrix.check_interference(&li, preg),
            InterferenceKind::RegMask
        );
        let (vregs, cut) = matrix.collect_interfering_vregs(&li, preg, 10);
        assert!(vregs.is_empty() && !cut);
    }

    #[test]
    fn interference_within_a_window() {
        let preg = PReg::new(0, RegClass::Int);
        let mut matrix = LiveRegMatrix::new(4);
        matrix.assign(&interval(0, &[(0, 2)]), preg);
        matrix.assign(&interval(1, &[(6, 8)]), preg);
        matrix.add_fixed(preg, r(4), r(5));

        assert!(matrix.is_free_within(preg, r(2), r(4)));
        assert!(!matrix.is_free_within(preg, r(3), r(6)));

        let (vregs, fixed) = matrix.interference_in(preg, r(1), r(7));
        assert!(fixed);
        assert_eq!(vregs.len(), 2);
        let (vregs, fixed) = matrix.interference_in(preg, r(2), r(4));
        assert!(vregs.is_empty() && !fixed);
    }

    #[test]
    fn collect_respects_limit() {
        let preg = PReg::new(0, RegClass::Int);
        let mut matrix = LiveRegMatrix::new(8);
        for i in 0..5 {
            let li = interval(i, &[(i * 2, i * 2 + 1)]);
            matrix.assign(&li, preg);
        }
        let probe = interval(7, &[(0, 12)]);
        let (vregs, cut) = matrix.collect_interfering_vregs(&probe, preg, 3);
        assert!(cut);
        assert_eq!(vregs.len(), 3);
    }
}
