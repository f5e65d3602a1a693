//! Live intervals.
//!
//! A [`LiveInterval`] records where a virtual register holds a value:
//! a sorted, minimal list of half-open [`Segment`]s plus one
//! [`VNInfo`] per distinct definition. Segments reference values by
//! dense index ([`ValNo`]); the interval owns the value table.
//!
//! Invariants, checked by [`LiveInterval::verify`]:
//! - segments are sorted by start and do not overlap;
//! - adjacent segments with the same value are merged (touching
//!   segments must carry different values);
//! - every segment's value index is in bounds and not marked unused.

use crate::slots::SlotIndex;
use crate::VReg;
use smallvec::SmallVec;

define_index!(ValNo);

const PHI_DEF: u8 = 1;
const UNUSED: u8 = 2;

/// Value number information: where (and how) one definition of the
/// register occurs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VNInfo {
    pub id: ValNo,
    /// Point of the definition. For a PHI-like merge this is the block
    /// start slot.
    pub def: SlotIndex,
    flags: u8,
}

impl VNInfo {
    pub fn new(id: ValNo, def: SlotIndex) -> Self {
        VNInfo { id, def, flags: 0 }
    }

    #[inline(always)]
    pub fn is_phi_def(&self) -> bool {
        self.flags & PHI_DEF != 0
    }

    pub fn set_phi_def(&mut self, phi: bool) {
        if phi {
            self.flags |= PHI_DEF;
        } else {
            self.flags &= !PHI_DEF;
        }
    }

    /// An unused value has no segments left; its slot is a tombstone
    /// until the next renumbering.
    #[inline(always)]
    pub fn is_unused(&self) -> bool {
        self.flags & UNUSED != 0
    }

    pub fn mark_unused(&mut self) {
        self.flags |= UNUSED;
    }

    /// Take over the definition point and flags of `other`, keeping
    /// our id.
    pub fn copy_from(&mut self, other: &VNInfo) {
        self.def = other.def;
        self.flags = other.flags;
    }
}

/// A maximal half-open range `[start, end)` where the register carries
/// the value `valno`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub start: SlotIndex,
    pub end: SlotIndex,
    pub valno: ValNo,
}

impl Segment {
    pub fn new(start: SlotIndex, end: SlotIndex, valno: ValNo) -> Self {
        debug_assert!(start < end);
        Segment { start, end, valno }
    }

    #[inline(always)]
    pub fn contains(&self, pos: SlotIndex) -> bool {
        self.start <= pos && pos < self.end
    }

    #[inline(always)]
    pub fn contains_range(&self, start: SlotIndex, end: SlotIndex) -> bool {
        debug_assert!(start < end);
        self.start <= start && end <= self.end
    }
}

/// The liveness of one virtual register over the whole function.
#[derive(Clone, Debug)]
pub struct LiveInterval {
    pub reg: VReg,
    /// Spill weight; `f32::INFINITY` marks an unspillable interval.
    pub weight: f32,
    pub(crate) segments: SmallVec<[Segment; 4]>,
    pub(crate) valnos: Vec<VNInfo>,
}

impl LiveInterval {
    pub fn new(reg: VReg) -> Self {
        LiveInterval {
            reg,
            weight: 0.0,
            segments: SmallVec::new(),
            valnos: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn num_val_nums(&self) -> usize {
        self.valnos.len()
    }

    pub fn valnos(&self) -> &[VNInfo] {
        &self.valnos
    }

    pub fn valno(&self, v: ValNo) -> &VNInfo {
        &self.valnos[v.index()]
    }

    pub fn valno_mut(&mut self, v: ValNo) -> &mut VNInfo {
        &mut self.valnos[v.index()]
    }

    /// Start of the first segment.
    pub fn begin_index(&self) -> SlotIndex {
        debug_assert!(!self.is_empty());
        self.segments[0].start
    }

    /// End of the last segment.
    pub fn end_index(&self) -> SlotIndex {
        debug_assert!(!self.is_empty());
        self.segments[self.segments.len() - 1].end
    }

    /// True once the interval is entirely before `pos`.
    pub fn expired_at(&self, pos: SlotIndex) -> bool {
        self.is_empty() || self.end_index() <= pos
    }

    pub fn is_spillable(&self) -> bool {
        self.weight != f32::INFINITY
    }

    pub fn mark_not_spillable(&mut self) {
        self.weight = f32::INFINITY;
    }

    /// Allocate a new value defined at `def`.
    pub fn get_next_value(&mut self, def: SlotIndex) -> ValNo {
        let id = ValNo::new(self.valnos.len());
        self.valnos.push(VNInfo::new(id, def));
        id
    }

    /// Index of the first segment ending after `pos`, or
    /// `segments.len()` if there is none. O(log n).
    pub fn find(&self, pos: SlotIndex) -> usize {
        self.segments.partition_point(|s| s.end <= pos)
    }

    /// The segment containing `pos`, if any.
    pub fn find_segment_containing(&self, pos: SlotIndex) -> Option<usize> {
        let i = self.find(pos);
        if i < self.segments.len() && self.segments[i].start <= pos {
            Some(i)
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn live_at(&self, pos: SlotIndex) -> bool {
        self.find_segment_containing(pos).is_some()
    }

    /// Value live at `pos` (`start <= pos < end`).
    pub fn live_value_at(&self, pos: SlotIndex) -> Option<ValNo> {
        self.find_segment_containing(pos)
            .map(|i| self.segments[i].valno)
    }

    /// Value live immediately before `pos`.
    pub fn value_before(&self, pos: SlotIndex) -> Option<ValNo> {
        self.live_value_at(pos.prev_slot())
    }

    /// Value read by the instruction at `idx`: the segment that enters
    /// the instruction. Live-in segments starting exactly at a block
    /// boundary count.
    pub fn value_in(&self, idx: SlotIndex) -> Option<ValNo> {
        let base = idx.base_index();
        let i = self.find(base);
        let seg = self.segments.get(i)?;
        if seg.start <= base {
            Some(seg.valno)
        } else {
            None
        }
    }

    /// Value defined by the instruction at `idx`, dead definitions
    /// included.
    pub fn value_defined_at(&self, idx: SlotIndex) -> Option<ValNo> {
        let base = idx.base_index();
        let i = self.find(base);
        self.segments[i..]
            .iter()
            .take_while(|s| s.start <= base.boundary_index())
            .find(|s| SlotIndex::is_same_instr(s.start, base))
            .map(|s| s.valno)
    }

    /// Record a definition at `def` that is live only until the dead
    /// slot of the same instruction. If a definition by the same
    /// instruction already exists, the two are merged by taking the
    /// earlier slot (an early-clobber plus a normal def of the same
    /// register collapse to the early-clobber point).
    pub fn create_dead_def(&mut self, def: SlotIndex) -> ValNo {
        assert!(!def.is_dead(), "cannot define a value at the dead slot");
        let i = self.find(def);
        if i == self.segments.len() {
            let valno = self.get_next_value(def);
            self.segments.push(Segment::new(def, def.dead_slot(), valno));
            return valno;
        }
        let seg = self.segments[i];
        if SlotIndex::is_same_instr(def, seg.start) {
            debug_assert_eq!(
                self.valnos[seg.valno.index()].def, seg.start,
                "inconsistent existing value def"
            );
            let def = def.min(seg.start);
            if def != seg.start {
                self.segments[i].start = def;
                self.valnos[seg.valno.index()].def = def;
            }
            return seg.valno;
        }
        assert!(
            SlotIndex::is_earlier_instr(def, seg.start),
            "already live at def"
        );
        let valno = self.get_next_value(def);
        self.segments
            .insert(i, Segment::new(def, def.dead_slot(), valno));
        valno
    }

    /// Extend the segment at `i` to end at `new_end`, absorbing any
    /// following same-value segments it now covers or touches. The
    /// index `i` stays valid.
    pub fn extend_segment_end_to(&mut self, i: usize, new_end: SlotIndex) {
        debug_assert!(i < self.segments.len());
        let valno = self.segments[i].valno;

        let mut merge_to = i + 1;
        while merge_to < self.segments.len() && new_end >= self.segments[merge_to].end {
            debug_assert_eq!(
                self.segments[merge_to].valno, valno,
                "cannot merge with differing values"
            );
            merge_to += 1;
        }

        self.segments[i].end = new_end.max(self.segments[merge_to - 1].end);

        if merge_to < self.segments.len()
            && self.segments[merge_to].start <= self.segments[i].end
            && self.segments[merge_to].valno == valno
        {
            self.segments[i].end = self.segments[merge_to].end;
            merge_to += 1;
        }

        self.segments.drain(i + 1..merge_to);
    }

    /// Extend the segment at `i` to start at `new_start`, absorbing any
    /// preceding same-value segments. Returns the segment's new index.
    pub fn extend_segment_start_to(&mut self, i: usize, new_start: SlotIndex) -> usize {
        debug_assert!(i < self.segments.len());
        let valno = self.segments[i].valno;

        let mut merge_to = i;
        loop {
            if merge_to == 0 {
                self.segments[i].start = new_start;
                self.segments.drain(0..i);
                return 0;
            }
            debug_assert_eq!(
                self.segments[merge_to].valno, valno,
                "cannot merge with differing values"
            );
            merge_to -= 1;
            if new_start > self.segments[merge_to].start {
                break;
            }
        }

        if self.segments[merge_to].end >= new_start && self.segments[merge_to].valno == valno {
            // We start inside that segment; it takes over.
            self.segments[merge_to].end = self.segments[i].end;
        } else {
            merge_to += 1;
            self.segments[merge_to].start = new_start;
            self.segments[merge_to].end = self.segments[i].end;
        }

        self.segments.drain(merge_to + 1..i + 1);
        merge_to
    }

    /// Insert a segment, merging with same-value neighbors. Overlap
    /// with a differently-valued segment is a caller bug.
    pub fn add_segment(&mut self, seg: Segment) -> usize {
        self.add_segment_from(seg, 0)
    }

    fn add_segment_from(&mut self, seg: Segment, from: usize) -> usize {
        let (start, end) = (seg.start, seg.end);
        let it = from + self.segments[from..].partition_point(|s| s.start <= start);

        if it != 0 {
            let b = it - 1;
            if seg.valno == self.segments[b].valno {
                if self.segments[b].start <= start && self.segments[b].end >= start {
                    self.extend_segment_end_to(b, end);
                    return b;
                }
            } else {
                assert!(
                    self.segments[b].end <= start,
                    "cannot overlap two segments with differing values \
                     (did you define the same register twice in one instruction?)"
                );
            }
        }

        if it != self.segments.len() {
            if seg.valno == self.segments[it].valno {
                if self.segments[it].start <= end {
                    let it = self.extend_segment_start_to(it, start);
                    if end > self.segments[it].end {
                        self.extend_segment_end_to(it, end);
                    }
                    return it;
                }
            } else {
                assert!(
                    self.segments[it].start >= end,
                    "cannot overlap two segments with differing values"
                );
            }
        }

        self.segments.insert(it, seg);
        it
    }

    /// If the interval is live before `kill` within the block starting
    /// at `block_start`, extend that liveness up to `kill` and return
    /// its value.
    pub fn extend_in_block(&mut self, block_start: SlotIndex, kill: SlotIndex) -> Option<ValNo> {
        if self.is_empty() {
            return None;
        }
        // Last segment starting before kill.
        let i = self
            .segments
            .partition_point(|s| s.start <= kill.prev_slot());
        if i == 0 {
            return None;
        }
        let i = i - 1;
        if self.segments[i].end <= block_start {
            return None;
        }
        if self.segments[i].end < kill {
            self.extend_segment_end_to(i, kill);
        }
        Some(self.segments[i].valno)
    }

    /// Remove `[start, end)`, which must lie entirely inside one
    /// segment. With `remove_dead_valno`, a value left without any
    /// segment is deleted.
    pub fn remove_segment(&mut self, start: SlotIndex, end: SlotIndex, remove_dead_valno: bool) {
        let i = self.find(start);
        assert!(i < self.segments.len(), "segment not in interval");
        assert!(
            self.segments[i].contains_range(start, end),
            "range not entirely in interval"
        );

        let valno = self.segments[i].valno;
        if self.segments[i].start == start {
            if self.segments[i].end == end {
                if remove_dead_valno {
                    let dead = !self
                        .segments
                        .iter()
                        .enumerate()
                        .any(|(j, s)| j != i && s.valno == valno);
                    if dead {
                        self.mark_valno_for_deletion(valno);
                    }
                }
                self.segments.remove(i);
            } else {
                self.segments[i].start = end;
            }
            return;
        }

        if self.segments[i].end == end {
            self.segments[i].end = start;
            return;
        }

        // Split the segment in two.
        let old_end = self.segments[i].end;
        self.segments[i].end = start;
        self.segments.insert(i + 1, Segment::new(end, old_end, valno));
    }

    /// Remove every segment carrying `valno` and delete the value.
    pub fn remove_valno(&mut self, valno: ValNo) {
        if self.is_empty() {
            return;
        }
        self.segments.retain(|s| s.valno != valno);
        self.mark_valno_for_deletion(valno);
    }

    /// Delete a value that no segment references any more. The last
    /// value (plus any unused neighbors) is popped; others become
    /// tombstones until renumbering.
    pub fn mark_valno_for_deletion(&mut self, valno: ValNo) {
        if valno.index() == self.valnos.len() - 1 {
            self.valnos.pop();
            while self.valnos.last().map_or(false, |v| v.is_unused()) {
                self.valnos.pop();
            }
        } else {
            self.valnos[valno.index()].mark_unused();
        }
    }

    /// Renumber values in order of first appearance and drop unused
    /// ones, restoring density.
    pub fn renumber_values(&mut self) {
        let mut remap = vec![ValNo::invalid(); self.valnos.len()];
        let mut new_valnos = Vec::with_capacity(self.valnos.len());
        for seg in self.segments.iter_mut() {
            let old = seg.valno.index();
            if remap[old].is_invalid() {
                debug_assert!(!self.valnos[old].is_unused(), "unused value has a segment");
                let id = ValNo::new(new_valnos.len());
                let mut vn = self.valnos[old];
                vn.id = id;
                new_valnos.push(vn);
                remap[old] = id;
            }
            seg.valno = remap[old];
        }
        self.valnos = new_valnos;
    }

    /// Declare `v1` and `v2` equivalent: all segments end up on the
    /// smaller id, the larger id is deleted, and the surviving value
    /// takes over `v2`'s definition point. Returns the survivor.
    pub fn merge_value_number_into(&mut self, v1: ValNo, v2: ValNo) -> ValNo {
        assert_ne!(v1, v2, "identical values are always equivalent");

        // Keep the smaller id so the value table can shrink, but make
        // sure it describes the definition of `v2`.
        let (dead, keep) = if v1.index() < v2.index() {
            let src = self.valnos[v2.index()];
            self.valnos[v1.index()].copy_from(&src);
            (v2, v1)
        } else {
            (v1, v2)
        };

        let mut i = 0;
        while i < self.segments.len() {
            if self.segments[i].valno != dead {
                i += 1;
                continue;
            }
            let mut cur = i;
            // Merge into a touching predecessor already on `keep`.
            if cur > 0
                && self.segments[cur - 1].valno == keep
                && self.segments[cur - 1].end == self.segments[cur].start
            {
                self.segments[cur - 1].end = self.segments[cur].end;
                self.segments.remove(cur);
                cur -= 1;
            }
            self.segments[cur].valno = keep;
            // And into a touching successor on `keep`.
            if cur + 1 < self.segments.len()
                && self.segments[cur + 1].valno == keep
                && self.segments[cur + 1].start == self.segments[cur].end
            {
                self.segments[cur].end = self.segments[cur + 1].end;
                self.segments.remove(cur + 1);
            }
            i = cur + 1;
        }

        self.mark_valno_for_deletion(dead);
        keep
    }

    /// Merge all of `rhs`'s segments into this interval under the
    /// value `lhs_valno`. Overlap is allowed as long as the
    /// overlapping segments here already carry `lhs_valno`.
    pub fn merge_segments_in_as_value(&mut self, rhs: &LiveInterval, lhs_valno: ValNo) {
        let mut updater = crate::updater::LiveRangeUpdater::new(self);
        for seg in rhs.segments() {
            updater.add(seg.start, seg.end, lhs_valno);
        }
    }

    /// Merge the segments of one specific value of `rhs` into this
    /// interval under `lhs_valno`.
    pub fn merge_value_in_as_value(
        &mut self,
        rhs: &LiveInterval,
        rhs_valno: ValNo,
        lhs_valno: ValNo,
    ) {
        let mut updater = crate::updater::LiveRangeUpdater::new(self);
        for seg in rhs.segments() {
            if seg.valno == rhs_valno {
                updater.add(seg.start, seg.end, lhs_valno);
            }
        }
    }

    /// Join `other` into this interval. `lhs_map[i]` and `rhs_map[i]`
    /// give, for each current value of the respective interval, its
    /// index into `new_valnos`, which becomes this interval's value
    /// table.
    pub fn join(
        &mut self,
        other: &LiveInterval,
        lhs_map: &[ValNo],
        rhs_map: &[ValNo],
        mut new_valnos: Vec<VNInfo>,
    ) {
        debug_assert_eq!(lhs_map.len(), self.valnos.len());
        debug_assert_eq!(rhs_map.len(), other.valnos.len());
        if cfg!(debug_assertions) {
            self.verify();
        }

        let must_map = (0..self.valnos.len()).any(|i| lhs_map[i].index() != i)
            || new_valnos.len() != self.valnos.len();

        // Rewrite our own segments, merging neighbors that map onto
        // the same value.
        if must_map && !self.is_empty() {
            let mut out = 0;
            self.segments[0].valno = lhs_map[self.segments[0].valno.index()];
            for i in 1..self.segments.len() {
                let next_valno = lhs_map[self.segments[i].valno.index()];
                if self.segments[out].valno == next_valno
                    && self.segments[out].end == self.segments[i].start
                {
                    self.segments[out].end = self.segments[i].end;
                } else {
                    out += 1;
                    self.segments[out] = Segment::new(
                        self.segments[i].start,
                        self.segments[i].end,
                        next_valno,
                    );
                }
            }
            self.segments.truncate(out + 1);
        }

        for (i, vn) in new_valnos.iter_mut().enumerate() {
            vn.id = ValNo::new(i);
        }
        self.valnos = new_valnos;

        // Now pull the other interval's segments in.
        let mut updater = crate::updater::LiveRangeUpdater::new(self);
        for seg in other.segments() {
            updater.add(seg.start, seg.end, rhs_map[seg.valno.index()]);
        }
    }

    /// Do the two intervals intersect anywhere?
    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if other.begin_index() < self.begin_index() {
            return other.overlaps_from(self, 0);
        }
        self.overlaps_from(other, 0)
    }

    /// Overlap test starting the scan of `other` at segment index
    /// `start_pos`, which must be at or before the first candidate.
    pub fn overlaps_from(&self, other: &LiveInterval, start_pos: usize) -> bool {
        debug_assert!(!self.is_empty() && !other.is_empty(), "empty interval");
        let a = &self.segments;
        let b = &other.segments;
        let mut i = 0;
        let mut j = start_pos;

        if a[i].start < b[j].start {
            i = a.partition_point(|s| s.start <= b[j].start);
            i = i.saturating_sub(1);
        } else if b[j].start < a[i].start {
            if j + 1 != b.len() && b[j + 1].start <= a[i].start {
                j = b.partition_point(|s| s.start <= a[i].start);
                j = j.saturating_sub(1);
            }
        } else {
            return true;
        }

        if j == b.len() {
            return false;
        }

        // Sweep both lists; flip so `x` is the one starting earlier.
        let (mut x, mut y) = (&a[i..], &b[j..]);
        loop {
            if x.is_empty() {
                return false;
            }
            if !y.is_empty() && x[0].start > y[0].start {
                std::mem::swap(&mut x, &mut y);
            }
            if y.is_empty() {
                return false;
            }
            if x[0].end > y[0].start {
                return true;
            }
            x = &x[1..];
        }
    }

    /// Overlap test that tolerates overlap at coalescable copies: when
    /// the later definition at an overlap point satisfies
    /// `is_coalescable_copy`, the overlap is ignored.
    pub fn overlaps_filtered(
        &self,
        other: &LiveInterval,
        mut is_coalescable_copy: impl FnMut(SlotIndex) -> bool,
    ) -> bool {
        debug_assert!(!self.is_empty(), "empty interval");
        if other.is_empty() {
            return false;
        }

        let mut a: &[Segment] = &self.segments;
        let mut b: &[Segment] = &other.segments;

        let i = self.find(other.begin_index());
        if i == a.len() {
            return false;
        }
        let j = other.find(a[i].start);
        if j == b.len() {
            return false;
        }
        a = &a[i..];
        b = &b[j..];

        loop {
            debug_assert!(b[0].end >= a[0].start);
            if b[0].start < a[0].end {
                let def = a[0].start.max(b[0].start);
                if def.is_block() || !is_coalescable_copy(def) {
                    return true;
                }
            }
            if b[0].end > a[0].end {
                std::mem::swap(&mut a, &mut b);
            }
            loop {
                b = &b[1..];
                if b.is_empty() {
                    return false;
                }
                if b[0].end >= a[0].start {
                    break;
                }
            }
        }
    }

    /// Does the interval intersect `[start, end)`?
    pub fn overlaps_range(&self, start: SlotIndex, end: SlotIndex) -> bool {
        debug_assert!(start < end, "invalid range");
        let i = self.segments.partition_point(|s| s.start < end);
        i != 0 && self.segments[i - 1].end > start
    }

    /// Total number of slots covered; the code-size proxy used for
    /// allocation priorities.
    pub fn size(&self) -> u32 {
        self.segments
            .iter()
            .map(|s| s.start.distance(s.end))
            .sum()
    }

    /// Check the structural invariants, panicking on a violation.
    pub fn verify(&self) {
        for (i, seg) in self.segments.iter().enumerate() {
            assert!(seg.start.is_valid());
            assert!(seg.end.is_valid());
            assert!(seg.start < seg.end);
            assert!(seg.valno.index() < self.valnos.len());
            assert!(!self.valnos[seg.valno.index()].is_unused());
            assert_eq!(self.valnos[seg.valno.index()].id, seg.valno);
            if let Some(next) = self.segments.get(i + 1) {
                assert!(seg.end <= next.start);
                if seg.end == next.start {
                    assert!(seg.valno != next.valno);
                }
            }
        }
        for (i, vn) in self.valnos.iter().enumerate() {
            assert_eq!(vn.id.index(), i);
        }
    }
}

impl std::fmt::Display for LiveInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "EMPTY")?;
        } else {
            for seg in self.segments() {
                write!(f, "[{},{}:{})", seg.start, seg.end, seg.valno.index())?;
            }
        }
        if !self.valnos.is_empty() {
            write!(f, " ")?;
            for (i, vn) in self.valnos.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}@", i)?;
                if vn.is_unused() {
                    write!(f, "x")?;
                } else {
                    write!(f, "{}", vn.def)?;
                    if vn.is_phi_def() {
                        write!(f, "-phi")?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::Inst;
    use crate::slots::Slot;
    use crate::RegClass;

    fn idx(inst: usize, slot: Slot) -> SlotIndex {
        SlotIndex::new(Inst::new(inst), slot)
    }

    fn r(inst: usize) -> SlotIndex {
        idx(inst, Slot::Register)
    }

    fn li() -> LiveInterval {
        LiveInterval::new(VReg::new(0, RegClass::Int))
    }

    #[test]
    fn dead_def_and_find() {
        let mut iv = li();
        let v0 = iv.create_dead_def(r(2));
        assert_eq!(iv.segments().len(), 1);
        assert_eq!(iv.segments()[0].end, r(2).dead_slot());

        // A second def by the same instruction merges; the earlier
        // (early-clobber) slot wins.
        let v0b = iv.create_dead_def(idx(2, Slot::EarlyClobber));
        assert_eq!(v0, v0b);
        assert_eq!(iv.segments().len(), 1);
        assert_eq!(iv.segments()[0].start, idx(2, Slot::EarlyClobber));
        assert_eq!(iv.valno(v0).def, idx(2, Slot::EarlyClobber));

        let v1 = iv.create_dead_def(r(5));
        assert_ne!(v0, v1);
        assert_eq!(iv.find(r(2)), 0);
        assert_eq!(iv.find(idx(2, Slot::Dead)), 1);
        assert_eq!(iv.find(r(5)), 1);
        assert_eq!(iv.find(r(9)), 2);
        iv.verify();
    }

    #[test]
    fn add_segment_coalesces_same_value() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        iv.add_segment(Segment::new(r(0), r(2), v0));
        iv.add_segment(Segment::new(r(4), r(6), v0));
        assert_eq!(iv.segments().len(), 2);
        // Fill the hole; everything becomes one segment.
        iv.add_segment(Segment::new(r(2), r(4), v0));
        assert_eq!(iv.segments().len(), 1);
        assert_eq!(iv.segments()[0], Segment::new(r(0), r(6), v0));
        iv.verify();
    }

    #[test]
    fn touching_segments_with_distinct_values_stay_apart() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        let v1 = iv.get_next_value(r(4));
        iv.add_segment(Segment::new(r(0), r(4), v0));
        iv.add_segment(Segment::new(r(4), r(8), v1));
        assert_eq!(iv.segments().len(), 2);
        iv.verify();
        // Touching is not overlapping.
        let mut other = li();
        let w = other.get_next_value(r(4));
        other.add_segment(Segment::new(r(4), r(8), w));
        let mut first = li();
        let u = first.get_next_value(r(0));
        first.add_segment(Segment::new(r(0), r(4), u));
        assert!(!first.overlaps(&other));
        assert!(!other.overlaps(&first));
    }

    #[test]
    fn extend_end_absorbs_neighbors() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        iv.segments.push(Segment::new(r(0), r(2), v0));
        iv.segments.push(Segment::new(r(4), r(6), v0));
        iv.segments.push(Segment::new(r(8), r(10), v0));
        iv.extend_segment_end_to(0, r(9));
        assert_eq!(iv.segments().len(), 1);
        assert_eq!(iv.segments()[0], Segment::new(r(0), r(10), v0));
    }

    #[test]
    fn extend_start_absorbs_neighbors() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        iv.segments.push(Segment::new(r(0), r(2), v0));
        iv.segments.push(Segment::new(r(4), r(6), v0));
        iv.segments.push(Segment::new(r(8), r(10), v0));
        let i = iv.extend_segment_start_to(2, r(1));
        assert_eq!(i, 0);
        assert_eq!(iv.segments().len(), 1);
        assert_eq!(iv.segments()[0], Segment::new(r(0), r(10), v0));
    }

    #[test]
    fn remove_middle_splits_segment() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        iv.add_segment(Segment::new(r(0), r(10), v0));
        iv.remove_segment(r(4), r(6), false);
        assert_eq!(iv.segments().len(), 2);
        assert_eq!(iv.segments()[0], Segment::new(r(0), r(4), v0));
        assert_eq!(iv.segments()[1], Segment::new(r(6), r(10), v0));
        iv.verify();
    }

    #[test]
    fn remove_whole_segment_deletes_dead_value() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        let v1 = iv.get_next_value(r(6));
        iv.add_segment(Segment::new(r(0), r(4), v0));
        iv.add_segment(Segment::new(r(6), r(8), v1));
        iv.remove_segment(r(6), r(8), true);
        assert_eq!(iv.num_val_nums(), 1);
        iv.verify();
    }

    #[test]
    fn merge_value_numbers() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        let v1 = iv.get_next_value(r(4));
        iv.add_segment(Segment::new(r(0), r(4), v0));
        iv.add_segment(Segment::new(r(4), r(8), v1));
        let kept = iv.merge_value_number_into(v1, v0);
        assert_eq!(kept, v0);
        assert_eq!(iv.segments().len(), 1);
        assert_eq!(iv.segments()[0], Segment::new(r(0), r(8), v0));
        assert_eq!(iv.num_val_nums(), 1);
        iv.verify();
    }

    #[test]
    fn renumber_compacts_values() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        let v1 = iv.get_next_value(r(4));
        let v2 = iv.get_next_value(r(8));
        iv.add_segment(Segment::new(r(0), r(2), v0));
        iv.add_segment(Segment::new(r(4), r(6), v1));
        iv.add_segment(Segment::new(r(8), r(10), v2));
        iv.remove_valno(v1);
        assert!(iv.valno(v1).is_unused());
        iv.renumber_values();
        assert_eq!(iv.num_val_nums(), 2);
        iv.verify();
        assert_eq!(iv.segments()[1].valno.index(), 1);
    }

    #[test]
    fn overlap_is_symmetric() {
        let mut a = li();
        let va = a.get_next_value(r(0));
        a.add_segment(Segment::new(r(0), r(5), va));
        a.add_segment(Segment::new(r(10), r(15), va));
        let mut b = li();
        let vb = b.get_next_value(r(12));
        b.add_segment(Segment::new(r(12), r(20), vb));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));

        let mut c = li();
        let vc = c.get_next_value(r(5));
        c.add_segment(Segment::new(r(5), r(10), vc));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));

        assert!(a.overlaps_range(r(4), r(11)));
        assert!(!a.overlaps_range(r(5), r(10)));
    }

    #[test]
    fn overlap_filtered_by_copies() {
        let mut a = li();
        let va = a.get_next_value(r(0));
        a.add_segment(Segment::new(r(0), r(6), va));
        let mut b = li();
        let vb = b.get_next_value(r(4));
        b.add_segment(Segment::new(r(4), r(8), vb));
        // The overlap point is b's def at instruction 4.
        assert!(a.overlaps_filtered(&b, |_| false));
        assert!(!a.overlaps_filtered(&b, |def| def == r(4)));
    }

    #[test]
    fn value_queries() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        iv.add_segment(Segment::new(r(0), r(4), v0));
        // A use at instruction 4 reads v0.
        assert_eq!(iv.value_in(idx(4, Slot::Block)), Some(v0));
        assert_eq!(iv.value_defined_at(idx(0, Slot::Block)), Some(v0));
        assert_eq!(iv.value_in(idx(0, Slot::Block)), None);
        assert_eq!(iv.value_defined_at(idx(4, Slot::Block)), None);
        assert_eq!(iv.value_before(r(2)), Some(v0));
    }

    #[test]
    fn extend_in_block() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        iv.add_segment(Segment::new(r(0), r(2), v0));
        let got = iv.extend_in_block(idx(0, Slot::Block), r(5));
        assert_eq!(got, Some(v0));
        assert_eq!(iv.end_index(), r(5));
        // Not live in a block starting after the segment ends.
        assert_eq!(iv.extend_in_block(idx(6, Slot::Block), r(8)), None);
    }

    #[test]
    fn size_counts_covered_slots() {
        let mut iv = li();
        let v0 = iv.get_next_value(r(0));
        iv.add_segment(Segment::new(idx(0, Slot::Block), idx(2, Slot::Block), v0));
        iv.add_segment(Segment::new(idx(4, Slot::Block), idx(5, Slot::Block), v0));
        assert_eq!(iv.size(), 12);
    }
}
