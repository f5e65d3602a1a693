/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Block, local, and per-instruction splitting.
//!
//! These are the cheaper split strategies below region splitting.
//! Block splits cut a global interval at block boundaries so each
//! piece becomes a local problem. Local splits cut a single-block
//! interval around a stretch of interference too heavy to evict.
//! Per-instruction splitting is the last resort before spilling: one
//! tiny interval per instruction, with the connecting liveness sent
//! to the stack.

use crate::greedy::{GreedyAllocator, Stage, HYSTERESIS};
use crate::order::AllocationOrder;
use crate::slots::SlotIndex;
use crate::{PReg, VReg};
use smallvec::SmallVec;

impl<'a> GreedyAllocator<'a> {
    /// Cut a global interval into one piece per block with uses, plus
    /// a stack-bound piece for the blocks it merely passes through.
    pub(crate) fn try_block_split(
        &mut self,
        vreg: VReg,
        new_vregs: &mut SmallVec<[VReg; 4]>,
    ) -> bool {
        let (use_blocks, through_blocks) = self.analyze_blocks(vreg);
        let mut groups: Vec<Vec<(SlotIndex, SlotIndex)>> = use_blocks
            .iter()
            .map(|&b| vec![self.indexes.block_range(b)])
            .collect();
        if !through_blocks.is_empty() {
            groups.push(
                through_blocks
                    .iter()
                    .map(|&b| self.indexes.block_range(b))
                    .collect(),
            );
        }
        if groups.len() < 2 {
            return false;
        }

        trace!("block split of {} into {} pieces", vreg, groups.len());
        let children = self.split_interval_at_ranges(vreg, &groups);
        self.stats.block_splits += 1;

        let through_child = if through_blocks.is_empty() {
            None
        } else {
            children.last().copied()
        };
        for &child in &children {
            if self.intervals[child.vreg()].is_empty() {
                continue;
            }
            if Some(child) == through_child {
                self.set_stage(child, Stage::Spill);
            }
            let mut extras: SmallVec<[VReg; 4]> = SmallVec::new();
            self.separate_components(child, &mut extras);
            new_vregs.push(child);
            new_vregs.extend(extras);
        }
        true
    }

    /// The heaviest spill weight assigned to `preg` within
    /// `[start, end)`, or infinity if a fixed reservation overlaps.
    fn gap_interference_weight(&self, preg: PReg, start: SlotIndex, end: SlotIndex) -> f32 {
        let (vregs, fixed) = self.matrix.interference_in(preg, start, end);
        if fixed {
            return f32::INFINITY;
        }
        let mut weight = 0.0f32;
        for &v in &vregs {
            weight = weight.max(self.intervals[v.vreg()].weight);
        }
        weight
    }

    /// Split a single-block interval around the gap between two of its
    /// instructions where interference is too heavy to evict. The gap
    /// itself becomes a stack-bound piece when the value is live
    /// through it.
    pub(crate) fn try_local_split(
        &mut self,
        vreg: VReg,
        new_vregs: &mut SmallVec<[VReg; 4]>,
    ) -> bool {
        let insts = self.func.insts_of(vreg);
        if insts.len() < 2 {
            return false;
        }
        let uses: Vec<SlotIndex> = insts
            .iter()
            .map(|&inst| self.indexes.inst_index(inst))
            .collect();
        let own_weight = self.intervals[vreg.vreg()].weight;

        // Find the gap with the heaviest blocking interference on any
        // candidate register.
        let mut best: Option<(usize, f32)> = None;
        let hint = self.func.hint(vreg);
        let mut order = AllocationOrder::new(self.env, vreg.class(), hint, vreg.vreg());
        while let Some(preg) = order.next() {
            for g in 0..uses.len() - 1 {
                let w = self.gap_interference_weight(preg, uses[g].dead_slot(), uses[g + 1]);
                if w <= own_weight * HYSTERESIS {
                    continue;
                }
                match best {
                    Some((_, bw)) if bw >= w => {}
                    _ => best = Some((g, w)),
                }
            }
        }
        let (g, _) = match best {
            Some(b) => b,
            None => return false,
        };

        let (begin, end) = {
            let li = &self.intervals[vreg.vreg()];
            (li.begin_index(), li.end_index())
        };
        let qa = uses[g].next_index();
        let p = uses[g + 1];
        trace!("local split of {} around [{}, {})", vreg, qa, p);

        let mut groups: Vec<Vec<(SlotIndex, SlotIndex)>> = Vec::with_capacity(3);
        groups.push(vec![(begin, qa)]);
        let middle = if qa < p && self.intervals[vreg.vreg()].overlaps_range(qa, p) {
            groups.push(vec![(qa, p)]);
            true
        } else {
            false
        };
        groups.push(vec![(p, end)]);

        let children = self.split_interval_at_ranges(vreg, &groups);
        self.stats.local_splits += 1;
        if middle {
            self.set_stage(children[1], Stage::Spill);
        }
        for &child in &children {
            if !self.intervals[child.vreg()].is_empty() {
                new_vregs.push(child);
            }
        }
        true
    }

    /// Last split before spilling: one piece per instruction touching
    /// the register, and a stack-bound remainder carrying the value in
    /// between.
    pub(crate) fn try_instruction_split(
        &mut self,
        vreg: VReg,
        new_vregs: &mut SmallVec<[VReg; 4]>,
    ) -> bool {
        let insts = self.func.insts_of(vreg);
        if insts.len() < 2 {
            return false;
        }
        let (begin, end) = {
            let li = &self.intervals[vreg.vreg()];
            (li.begin_index(), li.end_index())
        };

        let mut groups: Vec<Vec<(SlotIndex, SlotIndex)>> = Vec::new();
        let mut remainder: Vec<(SlotIndex, SlotIndex)> = Vec::new();
        let mut prev_end = begin;
        for &inst in &insts {
            let base = self.indexes.inst_index(inst);
            if prev_end < base {
                remainder.push((prev_end, base));
            }
            groups.push(vec![(base, base.next_index())]);
            prev_end = base.next_index();
        }
        if prev_end < end {
            remainder.push((prev_end, end));
        }
        let has_remainder = !remainder.is_empty();
        if has_remainder {
            groups.push(remainder);
        }

        trace!("instruction split of {} into {} pieces", vreg, groups.len());
        let children = self.split_interval_at_ranges(vreg, &groups);
        self.stats.instruction_splits += 1;

        let remainder_child = if has_remainder {
            children.last().copied()
        } else {
            None
        };
        for &child in &children {
            if self.intervals[child.vreg()].is_empty() {
                continue;
            }
            if Some(child) == remainder_child {
                self.set_stage(child, Stage::Spill);
                let mut extras: SmallVec<[VReg; 4]> = SmallVec::new();
                self.separate_components(child, &mut extras);
                new_vregs.push(child);
                new_vregs.extend(extras);
            } else {
                new_vregs.push(child);
            }
        }
        true
    }
}
