//! Live interval construction.
//!
//! A standard backward dataflow computes live-in sets per block, then
//! one forward pass per block builds segments with the interval
//! primitives: definitions open dead segments, uses extend the current
//! segment to their read point, live-out registers extend to the block
//! end. Block live-ins start as tentative PHI values; a cleanup pass
//! merges each tentative value into its unique incoming value and
//! keeps the PHI flag only where two or more distinct values meet.

use crate::func::MachineFunction;
use crate::index::Block;
use crate::interval::{LiveInterval, Segment, ValNo};
use crate::slots::SlotIndexes;
use crate::RegAllocError;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

pub fn compute_intervals(
    func: &MachineFunction,
    indexes: &SlotIndexes,
) -> Result<Vec<LiveInterval>, RegAllocError> {
    let num_blocks = func.num_blocks();
    let num_vregs = func.num_vregs();

    // Upward-exposed uses and definitions per block.
    let mut upward: Vec<FxHashSet<u32>> = vec![FxHashSet::default(); num_blocks];
    let mut defs: Vec<FxHashSet<u32>> = vec![FxHashSet::default(); num_blocks];
    for b in 0..num_blocks {
        for inst in func.block_insts(Block::new(b)).iter() {
            // Reads happen before writes at each instruction.
            for (_, op) in func.inst_operands(inst) {
                if op.is_use() {
                    let v = op.vreg().vreg() as u32;
                    if !defs[b].contains(&v) {
                        upward[b].insert(v);
                    }
                }
            }
            for (_, op) in func.inst_operands(inst) {
                if op.is_def() {
                    defs[b].insert(op.vreg().vreg() as u32);
                }
            }
        }
    }

    // live_in[b] = upward[b] ∪ (∪ live_in[succs] − defs[b]), to fixpoint.
    let mut live_in: Vec<FxHashSet<u32>> = vec![FxHashSet::default(); num_blocks];
    let mut changed = true;
    while changed {
        changed = false;
        for b in (0..num_blocks).rev() {
            let mut new_in = upward[b].clone();
            for &succ in func.block_succs(Block::new(b)) {
                for &v in &live_in[succ.index()] {
                    if !defs[b].contains(&v) {
                        new_in.insert(v);
                    }
                }
            }
            if new_in != live_in[b] {
                live_in[b] = new_in;
                changed = true;
            }
        }
    }

    // A register live into the entry block is used before any def.
    if let Some(&v) = live_in[func.entry_block().index()].iter().min() {
        let vreg = func.vreg(v as usize);
        let first_use = func
            .operands_of(vreg)
            .filter(|(_, _, op)| op.is_use())
            .map(|(_, inst, _)| inst)
            .min()
            .unwrap_or(crate::index::Inst::new(0));
        return Err(RegAllocError::UseBeforeDef(vreg, first_use));
    }

    let live_out = |b: usize| -> Vec<u32> {
        let set: FxHashSet<u32> = func
            .block_succs(Block::new(b))
            .iter()
            .flat_map(|s| live_in[s.index()].iter().copied())
            .collect();
        let mut out: Vec<u32> = set.into_iter().collect();
        out.sort_unstable();
        out
    };

    // Build the intervals block by block.
    let mut intervals: Vec<LiveInterval> = (0..num_vregs)
        .map(|i| LiveInterval::new(func.vreg(i)))
        .collect();
    let mut tentative: Vec<Vec<(Block, ValNo)>> = vec![Vec::new(); num_vregs];

    for b in 0..num_blocks {
        let block = Block::new(b);
        let (block_start, block_end) = indexes.block_range(block);

        let mut lin: Vec<u32> = live_in[b].iter().copied().collect();
        lin.sort_unstable();
        for &v in &lin {
            // A minimal segment at the block entry; uses and live-outs
            // extend it below. Keeping it shorter than the first
            // instruction's def slot lets a redefinition there open its
            // own value.
            let li = &mut intervals[v as usize];
            let vn = li.get_next_value(block_start);
            li.valno_mut(vn).set_phi_def(true);
            li.add_segment(Segment::new(block_start, block_start.next_slot(), vn));
            tentative[v as usize].push((block, vn));
        }

        for inst in func.block_insts(block).iter() {
            let base = indexes.inst_index(inst);
            for (_, op) in func.inst_operands(inst) {
                if op.is_use() {
                    let v = op.vreg();
                    let kill = base.register_slot(false);
                    if intervals[v.vreg()]
                        .extend_in_block(block_start, kill)
                        .is_none()
                    {
                        return Err(RegAllocError::UseBeforeDef(v, inst));
                    }
                }
            }
            for (_, op) in func.inst_operands(inst) {
                if op.is_def() {
                    let v = op.vreg();
                    intervals[v.vreg()].create_dead_def(base.register_slot(op.early_clobber()));
                }
            }
        }

        for v in live_out(b) {
            let got = intervals[v as usize].extend_in_block(block_start, block_end);
            debug_assert!(got.is_some(), "live-out register not live in block");
        }
    }

    resolve_tentative_phis(func, indexes, &mut intervals, &mut tentative);

    for li in &mut intervals {
        li.renumber_values();
        if cfg!(debug_assertions) {
            li.verify();
        }
    }
    Ok(intervals)
}

// A tentative PHI with exactly one distinct incoming value (itself
// excluded) is no merge at all: fold it into that value. Folding can
// unlock further folds upstream, so iterate to fixpoint.
fn resolve_tentative_phis(
    func: &MachineFunction,
    indexes: &SlotIndexes,
    intervals: &mut [LiveInterval],
    tentative: &mut [Vec<(Block, ValNo)>],
) {
    loop {
        let mut changed = false;
        for v in 0..intervals.len() {
            let li = &mut intervals[v];
            let mut i = 0;
            while i < tentative[v].len() {
                let (block, vn) = tentative[v][i];
                let mut incoming: SmallVec<[ValNo; 4]> = SmallVec::new();
                for &pred in func.block_preds(block) {
                    if let Some(w) = li.value_before(indexes.block_end(pred)) {
                        if w != vn && !incoming.contains(&w) {
                            incoming.push(w);
                        }
                    }
                }
                if incoming.len() == 1 {
                    let dead = if vn.index() < incoming[0].index() {
                        incoming[0]
                    } else {
                        vn
                    };
                    let keep = li.merge_value_number_into(vn, incoming[0]);
                    for entry in tentative[v].iter_mut() {
                        if entry.1 == dead {
                            entry.1 = keep;
                        }
                    }
                    tentative[v].remove(i);
                    changed = true;
                } else {
                    i += 1;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::func::Operand;
    use crate::index::Inst;
    use crate::slots::{Slot, SlotIndex};
    use crate::RegClass;

    fn r(inst: usize) -> SlotIndex {
        SlotIndex::new(Inst::new(inst), Slot::Register)
    }

    #[test]
    fn straight_line() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]); // 0
        func.add_inst(&[]); // 1
        func.add_inst(&[Operand::reg_use(v0)]); // 2
        let indexes = SlotIndexes::compute(&func);
        let ivs = compute_intervals(&func, &indexes).unwrap();
        assert_eq!(ivs[0].segments().len(), 1);
        assert_eq!(ivs[0].begin_index(), r(0));
        assert_eq!(ivs[0].end_index(), r(2));
        assert_eq!(ivs[0].num_val_nums(), 1);
        assert!(!ivs[0].valnos()[0].is_phi_def());
    }

    #[test]
    fn dead_def_stays_dead() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]);
        func.add_inst(&[]);
        let indexes = SlotIndexes::compute(&func);
        let ivs = compute_intervals(&func, &indexes).unwrap();
        assert_eq!(ivs[0].segments().len(), 1);
        assert_eq!(ivs[0].end_index(), r(0).dead_slot());
    }

    #[test]
    fn live_through_a_diamond_is_one_value() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        let b0 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]); // 0
        let b1 = func.add_block(0.5);
        func.add_inst(&[]); // 1
        let b2 = func.add_block(0.5);
        func.add_inst(&[]); // 2
        let b3 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_use(v0)]); // 3
        func.add_edge(b0, b1);
        func.add_edge(b0, b2);
        func.add_edge(b1, b3);
        func.add_edge(b2, b3);
        let indexes = SlotIndexes::compute(&func);
        let ivs = compute_intervals(&func, &indexes).unwrap();
        let li = &ivs[0];
        // One value flows everywhere; no PHI remains.
        assert_eq!(li.num_val_nums(), 1);
        assert!(!li.valnos()[0].is_phi_def());
        assert!(li.live_at(indexes.block_start(b1)));
        assert!(li.live_at(indexes.block_start(b2)));
        assert_eq!(li.end_index(), r(3));
    }

    #[test]
    fn merge_of_two_defs_keeps_a_phi() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        let b0 = func.add_block(1.0);
        func.add_inst(&[]); // 0
        let b1 = func.add_block(0.5);
        func.add_inst(&[Operand::reg_def(v0)]); // 1
        let b2 = func.add_block(0.5);
        func.add_inst(&[Operand::reg_def(v0)]); // 2
        let b3 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_use(v0)]); // 3
        func.add_edge(b0, b1);
        func.add_edge(b0, b2);
        func.add_edge(b1, b3);
        func.add_edge(b2, b3);
        let indexes = SlotIndexes::compute(&func);
        let ivs = compute_intervals(&func, &indexes).unwrap();
        let li = &ivs[0];
        assert_eq!(li.num_val_nums(), 3);
        let phis = li.valnos().iter().filter(|v| v.is_phi_def()).count();
        assert_eq!(phis, 1);
        let phi = li.valnos().iter().find(|v| v.is_phi_def()).unwrap();
        assert_eq!(phi.def, indexes.block_start(b3));
    }

    #[test]
    fn loop_live_through_has_no_phi() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        let b0 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]); // 0
        let b1 = func.add_block(10.0);
        func.add_inst(&[Operand::reg_use(v0)]); // 1
        let b2 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_use(v0)]); // 2
        func.add_edge(b0, b1);
        func.add_edge(b1, b1);
        func.add_edge(b1, b2);
        let indexes = SlotIndexes::compute(&func);
        let ivs = compute_intervals(&func, &indexes).unwrap();
        let li = &ivs[0];
        assert_eq!(li.num_val_nums(), 1);
        assert!(!li.valnos()[0].is_phi_def());
        // Live from the def to the final use, through the loop.
        assert_eq!(li.begin_index(), r(0));
        assert_eq!(li.end_index(), r(2));
    }

    #[test]
    fn loop_carried_redef_keeps_a_phi() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        let b0 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]); // 0
        let b1 = func.add_block(10.0);
        func.add_inst(&[Operand::reg_use(v0)]); // 1
        func.add_inst(&[Operand::reg_def(v0)]); // 2
        let b2 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_use(v0)]); // 3
        func.add_edge(b0, b1);
        func.add_edge(b1, b1);
        func.add_edge(b1, b2);
        let indexes = SlotIndexes::compute(&func);
        let ivs = compute_intervals(&func, &indexes).unwrap();
        let li = &ivs[0];
        let phis = li.valnos().iter().filter(|v| v.is_phi_def()).count();
        assert_eq!(phis, 1);
    }

    #[test]
    fn use_before_def_is_an_error() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_use(v0)]);
        let indexes = SlotIndexes::compute(&func);
        match compute_intervals(&func, &indexes) {
            Err(RegAllocError::UseBeforeDef(v, inst)) => {
                assert_eq!(v, v0);
                assert_eq!(inst, Inst::new(0));
            }
            other => panic!("expected UseBeforeDef, got {:?}", other),
        }
    }
}
