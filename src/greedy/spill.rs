/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Spilling to the stack.
//!
//! A spilled register gets a slot for its whole span, a reload or
//! store edit at each instruction touching it, and one tiny
//! unspillable interval per such instruction so the value sits in a
//! register exactly while the instruction needs it.

use crate::greedy::{GreedyAllocator, PendingEdit, Place, Stage};
use crate::interval::Segment;
use crate::slots::SlotIndex;
use crate::{RegClass, SpillSlot, VReg, NUM_REG_CLASSES};
use smallvec::SmallVec;

/// Hands out spill slots, reusing a slot once the interval it served
/// has ended. Slots are never shared across register classes.
pub(crate) struct SlotAllocator {
    pools: [Vec<(SpillSlot, SlotIndex)>; NUM_REG_CLASSES],
    num_slots: usize,
}

impl SlotAllocator {
    pub fn new() -> Self {
        SlotAllocator {
            pools: Default::default(),
            num_slots: 0,
        }
    }

    /// A slot free over `[start, end)` for `class`, fresh if no
    /// retired slot fits.
    pub fn alloc(&mut self, class: RegClass, start: SlotIndex, end: SlotIndex) -> SpillSlot {
        let pool = &mut self.pools[class as usize];
        for entry in pool.iter_mut() {
            if entry.1 <= start {
                entry.1 = end;
                return entry.0;
            }
        }
        let slot = SpillSlot::new(self.num_slots);
        self.num_slots += 1;
        pool.push((slot, end));
        slot
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }
}

impl<'a> GreedyAllocator<'a> {
    /// Spill `vreg`: assign it a stack slot and replace it with
    /// per-instruction register snippets, queued via `new_vregs`.
    pub(crate) fn spill(&mut self, vreg: VReg, new_vregs: &mut SmallVec<[VReg; 4]>) {
        let (begin, end) = {
            let li = &self.intervals[vreg.vreg()];
            (li.begin_index(), li.end_index())
        };
        let slot = self.slots.alloc(vreg.class(), begin, end);
        self.spill_slots[vreg.vreg()] = slot;
        trace!("spilling {} to {}", vreg, slot);

        for inst in self.func.insts_of(vreg) {
            let ops: SmallVec<[_; 4]> = self
                .func
                .inst_operands(inst)
                .filter(|(_, op)| op.vreg() == vreg)
                .collect();
            debug_assert!(!ops.is_empty());
            let mut reads = false;
            let mut writes = false;
            let mut early = false;
            for &(_, op) in &ops {
                reads |= op.is_use();
                writes |= op.is_def();
                early |= op.is_def() && op.early_clobber();
            }

            let child = self.new_split_child(vreg.class());
            for &(idx, _) in &ops {
                self.func.set_operand_reg(idx, child);
            }

            let base = self.indexes.inst_index(inst);
            // A read needs the value in place from the instruction
            // boundary so the reload can happen there; a pure def only
            // occupies the register from its defining slot.
            let start = if reads { base } else { base.register_slot(early) };
            let stop = if writes {
                base.dead_slot()
            } else {
                base.register_slot(false)
            };
            {
                let li = &mut self.intervals[child.vreg()];
                let vn = li.get_next_value(start);
                li.add_segment(Segment::new(start, stop, vn));
                li.mark_not_spillable();
            }
            self.set_stage(child, Stage::Done);

            if reads {
                self.edits.push(PendingEdit {
                    pos: base,
                    from: Place::Slot(slot),
                    to: Place::Reg(child),
                });
            }
            if writes {
                self.edits.push(PendingEdit {
                    pos: base.dead_slot(),
                    from: Place::Reg(child),
                    to: Place::Slot(slot),
                });
            }
            self.stats.new_intervals += 1;
            new_vregs.push(child);
        }

        self.stats.spilled_intervals += 1;
        self.retire(vreg);
    }
}
