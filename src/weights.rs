//! Spill weight calculation.
//!
//! An interval's weight is the frequency-weighted count of its reads
//! and writes, normalized by the amount of code it covers. Eviction
//! compares weights; spilling a high-weight interval costs more
//! reloads and stores at runtime.

use crate::func::MachineFunction;
use crate::interval::LiveInterval;
use crate::slots::{SlotIndexes, INSTR_DIST};

/// Normalize an accumulated use/def frequency by interval size. The
/// constant bias keeps tiny intervals from getting boundless weights.
pub fn normalize_spill_weight(use_def_freq: f32, size: u32) -> f32 {
    use_def_freq / (size as f32 + 25.0 * INSTR_DIST as f32)
}

/// Compute and store the spill weight of `li`. Each instruction
/// touching the register contributes its block's frequency once per
/// read and once per write.
pub fn compute_spill_weight(
    li: &mut LiveInterval,
    func: &MachineFunction,
    indexes: &SlotIndexes,
) {
    if !li.is_spillable() {
        return;
    }
    let mut total = 0.0f32;
    let mut last_inst = None;
    let mut reads = false;
    let mut writes = false;
    let mut insts: Vec<_> = func.operands_of(li.reg).collect();
    insts.sort_by_key(|&(_, inst, _)| inst);
    for (_, inst, op) in insts {
        if last_inst != Some(inst) {
            if let Some(prev) = last_inst {
                let freq = func.block_freq(indexes.block_containing(indexes.inst_index(prev)));
                total += (reads as u32 + writes as u32) as f32 * freq;
            }
            last_inst = Some(inst);
            reads = false;
            writes = false;
        }
        reads |= op.is_use();
        writes |= op.is_def();
    }
    if let Some(prev) = last_inst {
        let freq = func.block_freq(indexes.block_containing(indexes.inst_index(prev)));
        total += (reads as u32 + writes as u32) as f32 * freq;
    }
    li.weight = normalize_spill_weight(total, li.size());
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::func::Operand;
    use crate::index::Inst;
    use crate::interval::Segment;
    use crate::slots::{Slot, SlotIndex};
    use crate::RegClass;

    #[test]
    fn hot_blocks_weigh_more() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        let v1 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]);
        func.add_inst(&[Operand::reg_use(v0)]);
        func.add_block(10.0);
        func.add_inst(&[Operand::reg_def(v1)]);
        func.add_inst(&[Operand::reg_use(v1)]);
        let indexes = SlotIndexes::compute(&func);

        let r = |i: usize| SlotIndex::new(Inst::new(i), Slot::Register);
        let mut a = LiveInterval::new(v0);
        let va = a.get_next_value(r(0));
        a.add_segment(Segment::new(r(0), r(1), va));
        let mut b = LiveInterval::new(v1);
        let vb = b.get_next_value(r(2));
        b.add_segment(Segment::new(r(2), r(3), vb));

        compute_spill_weight(&mut a, &func, &indexes);
        compute_spill_weight(&mut b, &func, &indexes);
        assert!(b.weight > a.weight);
        assert!(a.is_spillable());
    }

    #[test]
    fn unspillable_weight_is_preserved() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]);
        let indexes = SlotIndexes::compute(&func);
        let mut li = LiveInterval::new(v0);
        li.mark_not_spillable();
        compute_spill_weight(&mut li, &func, &indexes);
        assert!(!li.is_spillable());
    }
}
