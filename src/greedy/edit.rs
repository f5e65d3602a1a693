/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Shared split mechanics: creating child registers, carving a parent
//! interval into pieces along slot-index ranges, rewriting operands to
//! the owning child, and recording the copies that stitch the pieces
//! back together.

use crate::eqclass::ConnectedValNos;
use crate::greedy::{ExtraRegInfo, GreedyAllocator, PendingEdit, Place, Stage};
use crate::interval::LiveInterval;
use crate::slots::SlotIndex;
use crate::updater::LiveRangeUpdater;
use crate::weights;
use crate::{RegClass, SpillSlot, VReg};
use smallvec::SmallVec;

impl<'a> GreedyAllocator<'a> {
    /// Create a fresh virtual register to carry part of a split
    /// interval, with empty live range and default bookkeeping.
    pub(crate) fn new_split_child(&mut self, class: RegClass) -> VReg {
        let vreg = self.func.create_vreg(class);
        debug_assert_eq!(vreg.vreg(), self.intervals.len());
        self.intervals.push(LiveInterval::new(vreg));
        self.info.push(ExtraRegInfo::default());
        self.spill_slots.push(SpillSlot::invalid());
        self.matrix.grow(self.func.num_vregs());
        vreg
    }

    /// The position an operand occupies for ownership decisions: defs
    /// at their defining slot, uses one slot before the register slot
    /// so they land inside a range that ends exactly at the read.
    fn operand_pos(&self, inst: crate::index::Inst, op: crate::func::Operand) -> SlotIndex {
        let base = self.indexes.inst_index(inst);
        if op.is_def() {
            base.register_slot(op.early_clobber())
        } else {
            base.register_slot(false).prev_slot()
        }
    }

    /// Split `vreg` into one child per entry of `ranges_per_child`.
    /// Each child receives the parent's liveness intersected with its
    /// ranges; operands move to the child whose ranges contain them;
    /// a copy is recorded at every range start where the value flows
    /// in from a different child. The parent is left empty. Ranges
    /// must jointly cover the parent and each child's ranges must be
    /// sorted.
    pub(crate) fn split_interval_at_ranges(
        &mut self,
        vreg: VReg,
        ranges_per_child: &[Vec<(SlotIndex, SlotIndex)>],
    ) -> SmallVec<[VReg; 4]> {
        let parent = std::mem::replace(
            &mut self.intervals[vreg.vreg()],
            LiveInterval::new(vreg),
        );
        trace!("splitting {} into {} pieces", vreg, ranges_per_child.len());

        let mut children: SmallVec<[VReg; 4]> = SmallVec::new();
        for ranges in ranges_per_child {
            let child = self.new_split_child(vreg.class());
            children.push(child);

            // Collect the parent's liveness inside this child's
            // ranges, in order, then bulk-insert.
            let mut pieces: SmallVec<[(SlotIndex, SlotIndex); 8]> = SmallVec::new();
            for &(rs, re) in ranges {
                for seg in parent.segments() {
                    if seg.end <= rs {
                        continue;
                    }
                    if seg.start >= re {
                        break;
                    }
                    pieces.push((seg.start.max(rs), seg.end.min(re)));
                }
            }
            pieces.sort_by_key(|&(s, _)| s);

            let li = &mut self.intervals[child.vreg()];
            let valnos: SmallVec<[_; 8]> =
                pieces.iter().map(|&(s, _)| li.get_next_value(s)).collect();
            {
                let mut updater = LiveRangeUpdater::new(li);
                for (&(s, e), &vn) in pieces.iter().zip(valnos.iter()) {
                    updater.add(s, e, vn);
                }
            }
            li.weight = parent.weight;
            if !parent.is_spillable() {
                li.mark_not_spillable();
            }
        }

        // Every operand of the parent moves to the child covering it.
        let operands: Vec<_> = self.func.operands_of(vreg).collect();
        for (op_idx, inst, op) in operands {
            let pos = self.operand_pos(inst, op);
            let owner = children
                .iter()
                .zip(ranges_per_child)
                .find(|(_, ranges)| ranges.iter().any(|&(s, e)| s <= pos && pos < e))
                .map(|(&c, _)| c);
            debug_assert!(owner.is_some(), "operand at {} not covered by split", pos);
            if let Some(owner) = owner {
                self.func.set_operand_reg(op_idx, owner);
            }
        }

        // Where the value is live into the start of a child range, it
        // arrives from whichever child covers the previous slot.
        for (&child, ranges) in children.iter().zip(ranges_per_child) {
            for &(rs, _) in ranges {
                if rs <= parent.begin_index() {
                    continue;
                }
                if !parent.live_at(rs) || !parent.live_at(rs.prev_slot()) {
                    continue;
                }
                let prev = children
                    .iter()
                    .zip(ranges_per_child)
                    .find(|(_, rr)| {
                        rr.iter()
                            .any(|&(s, e)| s <= rs.prev_slot() && rs.prev_slot() < e)
                    })
                    .map(|(&c, _)| c);
                if let Some(prev) = prev {
                    if prev != child {
                        self.edits.push(PendingEdit {
                            pos: rs,
                            from: Place::Reg(prev),
                            to: Place::Reg(child),
                        });
                    }
                }
            }
        }

        // Copies recorded by an earlier split may still name the
        // register being carved up; they follow the child live at
        // their position, exactly as when components separate.
        for pe in self.edits.iter_mut() {
            if pe.to == Place::Reg(vreg) {
                for &child in &children {
                    if self.intervals[child.vreg()].live_at(pe.pos) {
                        pe.to = Place::Reg(child);
                        break;
                    }
                }
            }
            if pe.from == Place::Reg(vreg) {
                for &child in &children {
                    if self.intervals[child.vreg()].live_at(pe.pos.prev_slot()) {
                        pe.from = Place::Reg(child);
                        break;
                    }
                }
            }
        }

        for &child in &children {
            let li = &mut self.intervals[child.vreg()];
            weights::compute_spill_weight(li, self.func, &self.indexes);
        }
        self.stats.new_intervals += children.len();
        children
    }

    /// Split `vreg` into its connected components, if its values fell
    /// apart into disconnected pieces. Any extra components become new
    /// registers pushed to `new_vregs` with the same stage as `vreg`.
    pub(crate) fn separate_components(
        &mut self,
        vreg: VReg,
        new_vregs: &mut SmallVec<[VReg; 4]>,
    ) {
        if self.intervals[vreg.vreg()].num_val_nums() < 2 {
            return;
        }
        let mut conn = ConnectedValNos::new();
        let n = conn.classify(&self.intervals[vreg.vreg()], self.func, &self.indexes);
        if n <= 1 {
            return;
        }
        trace!("{} has {} connected components", vreg, n);

        let stage = self.info[vreg.vreg()].stage;
        let mut parts: Vec<LiveInterval> = Vec::with_capacity(n);
        parts.push(std::mem::replace(
            &mut self.intervals[vreg.vreg()],
            LiveInterval::new(vreg),
        ));
        let mut part_regs: SmallVec<[VReg; 4]> = SmallVec::new();
        part_regs.push(vreg);
        for _ in 1..n {
            let child = self.new_split_child(vreg.class());
            self.info[child.vreg()].stage = stage;
            parts.push(std::mem::replace(
                &mut self.intervals[child.vreg()],
                LiveInterval::new(child),
            ));
            part_regs.push(child);
        }

        conn.distribute(&mut parts, self.func, &self.indexes);

        for (li, &reg) in parts.into_iter().zip(part_regs.iter()) {
            debug_assert_eq!(li.reg, reg);
            self.intervals[reg.vreg()] = li;
            weights::compute_spill_weight(
                &mut self.intervals[reg.vreg()],
                self.func,
                &self.indexes,
            );
        }

        // Pending copies still naming the old register must follow the
        // component that is live at their position.
        for pe in self.edits.iter_mut() {
            if pe.to == Place::Reg(vreg) {
                for &reg in &part_regs {
                    if self.intervals[reg.vreg()].live_at(pe.pos) {
                        pe.to = Place::Reg(reg);
                        break;
                    }
                }
            }
            if pe.from == Place::Reg(vreg) {
                for &reg in &part_regs {
                    if self.intervals[reg.vreg()].live_at(pe.pos.prev_slot()) {
                        pe.from = Place::Reg(reg);
                        break;
                    }
                }
            }
        }

        self.stats.new_intervals += n - 1;
        for &reg in &part_regs[1..] {
            if !self.intervals[reg.vreg()].is_empty() {
                new_vregs.push(reg);
            }
        }
    }

    /// Drop a register from further allocation after spilling: empty
    /// its interval and mark it settled.
    pub(crate) fn retire(&mut self, vreg: VReg) {
        self.intervals[vreg.vreg()] = LiveInterval::new(vreg);
        self.info[vreg.vreg()].stage = Stage::Done;
    }
}
