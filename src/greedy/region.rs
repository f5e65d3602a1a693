/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Region splitting for global intervals.
//!
//! A region is the set of blocks where the interval does real work
//! and a candidate physical register is free. The interval is split
//! into a region part, which retries allocation for that register,
//! and a remainder carrying the value through the blocks left out.

use crate::greedy::{GreedyAllocator, Stage, HYSTERESIS};
use crate::index::Block;
use crate::order::AllocationOrder;
use crate::slots::SlotIndex;
use crate::{PReg, VReg};
use smallvec::SmallVec;

impl<'a> GreedyAllocator<'a> {
    /// The blocks `vreg` is live in, partitioned into blocks with at
    /// least one instruction mentioning it and blocks it merely passes
    /// through. Both lists come back sorted.
    pub(crate) fn analyze_blocks(&self, vreg: VReg) -> (Vec<Block>, Vec<Block>) {
        let li = &self.intervals[vreg.vreg()];
        let mut live: Vec<Block> = Vec::new();
        for seg in li.segments() {
            let first = self.indexes.block_containing(seg.start);
            let last = self.indexes.block_containing(seg.end.prev_slot());
            for b in first.index()..=last.index() {
                live.push(Block::new(b));
            }
        }
        live.sort_unstable();
        live.dedup();

        let mut use_blocks: Vec<Block> = self
            .func
            .insts_of(vreg)
            .iter()
            .map(|&inst| self.indexes.block_containing(self.indexes.inst_index(inst)))
            .collect();
        use_blocks.sort_unstable();
        use_blocks.dedup();

        let through: Vec<Block> = live
            .into_iter()
            .filter(|b| use_blocks.binary_search(b).is_err())
            .collect();
        (use_blocks, through)
    }

    /// Whether `preg` is free everywhere `vreg` is live inside `block`.
    fn free_in_block(&self, vreg: VReg, preg: PReg, block: Block) -> bool {
        let (bs, be) = self.indexes.block_range(block);
        let li = &self.intervals[vreg.vreg()];
        for seg in li.segments() {
            if seg.end <= bs {
                continue;
            }
            if seg.start >= be {
                break;
            }
            if !self
                .matrix
                .is_free_within(preg, seg.start.max(bs), seg.end.min(be))
            {
                return false;
            }
        }
        true
    }

    /// Merge a sorted block list into contiguous slot-index ranges.
    fn block_ranges(&self, blocks: &[Block]) -> Vec<(SlotIndex, SlotIndex)> {
        let mut ranges: Vec<(SlotIndex, SlotIndex)> = Vec::new();
        for &b in blocks {
            let (bs, be) = self.indexes.block_range(b);
            match ranges.last_mut() {
                Some(last) if last.1 == bs => last.1 = be,
                _ => ranges.push((bs, be)),
            }
        }
        ranges
    }

    /// Try to split `vreg` into a region that can take a register and
    /// a remainder. Returns whether a split happened.
    pub(crate) fn try_region_split(
        &mut self,
        vreg: VReg,
        new_vregs: &mut SmallVec<[VReg; 4]>,
    ) -> bool {
        let (use_blocks, through_blocks) = self.analyze_blocks(vreg);
        if use_blocks.is_empty() {
            return false;
        }
        let num_live_blocks = use_blocks.len() + through_blocks.len();

        let mut best: Option<Vec<Block>> = None;
        let mut best_benefit = 0.0f32;
        let hint = self.func.hint(vreg);
        let mut order = AllocationOrder::new(self.env, vreg.class(), hint, vreg.vreg());
        while let Some(preg) = order.next() {
            let region: Vec<Block> = use_blocks
                .iter()
                .copied()
                .filter(|&b| self.free_in_block(vreg, preg, b))
                .collect();
            if region.is_empty() {
                continue;
            }
            // The split must leave something behind, or it changes
            // nothing.
            if region.len() == use_blocks.len() && through_blocks.is_empty() {
                continue;
            }
            let benefit: f32 = region.iter().map(|&b| self.func.block_freq(b)).sum();
            if best.is_none() || benefit * HYSTERESIS > best_benefit {
                best_benefit = benefit;
                best = Some(region);
            }
        }

        // No register is free in any use block; fall back to a compact
        // region that at least sheds the live-through blocks.
        let region = match best {
            Some(region) => region,
            None if !through_blocks.is_empty() => use_blocks.clone(),
            None => return false,
        };

        let rest: Vec<Block> = use_blocks
            .iter()
            .copied()
            .filter(|b| region.binary_search(b).is_err())
            .chain(through_blocks.iter().copied())
            .collect();
        if rest.is_empty() {
            return false;
        }
        let mut rest = rest;
        rest.sort_unstable();

        trace!(
            "region split of {}: {} region blocks, {} rest blocks",
            vreg,
            region.len(),
            rest.len()
        );
        let ranges = [self.block_ranges(&region), self.block_ranges(&rest)];
        let children = self.split_interval_at_ranges(vreg, &ranges);
        self.stats.region_splits += 1;

        for &child in &children {
            if self.intervals[child.vreg()].is_empty() {
                continue;
            }
            if self.func.insts_of(child).is_empty() {
                // Pure carrier of the value between region pieces;
                // nothing to win by splitting it further.
                self.set_stage(child, Stage::Spill);
            } else {
                let (ub, tb) = self.analyze_blocks(child);
                if ub.len() + tb.len() >= num_live_blocks {
                    // No smaller than the parent; force progress next
                    // time around.
                    self.set_stage(child, Stage::Split2);
                }
            }
            let mut extras: SmallVec<[VReg; 4]> = SmallVec::new();
            self.separate_components(child, &mut extras);
            new_vregs.push(child);
            new_vregs.extend(extras);
        }
        true
    }
}
