/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! The greedy allocation driver.
//!
//! One [`GreedyAllocator`] context per function run. Virtual registers
//! are drained from a priority queue and either assigned directly,
//! given a register by evicting weaker interference, split into
//! smaller pieces that re-enter the queue, or spilled to the stack.
//! Each register walks the stage ladder `New -> Assign -> Split ->
//! Split2 -> Spill -> Done` at most once; split products restart at
//! `Assign` as smaller sub-problems.

pub(crate) mod edit;
pub(crate) mod region;
pub(crate) mod spill;
pub(crate) mod split;

use crate::func::MachineFunction;
use crate::index::Inst;
use crate::interval::LiveInterval;
use crate::liveness;
use crate::matrix::{InterferenceKind, LiveRegMatrix};
use crate::order::AllocationOrder;
use crate::slots::SlotIndexes;
use crate::weights;
use crate::{
    Allocation, Edit, MachineEnv, Options, Output, PReg, RegAllocError, SpillSlot, Stats, VReg,
};
use smallvec::SmallVec;
use std::collections::BinaryHeap;

/// Damping for floating-point cost comparisons, so near-ties do not
/// flip decisions back and forth between runs of the queue.
pub(crate) const HYSTERESIS: f32 = 0.98;

/// Broken-hint surcharge for an eviction that breaks the cascade
/// ordering. Makes urgent evictions a last resort.
const URGENT_EVICT_PENALTY: u32 = 10;

/// Give up collecting interference past this many distinct registers;
/// an eviction that large is never worth it.
const MAX_INTERFERING_VREGS: usize = 10;

/// Allocation progress of one virtual register. Strictly monotonic
/// per register for the life of the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Stage {
    /// Never seen by the queue.
    New,
    /// Normal assignment attempts, eviction allowed.
    Assign,
    /// Deferred once; next dequeue may split.
    Split,
    /// Splitting must make guaranteed progress now.
    Split2,
    /// Out of splitting options; next dequeue spills.
    Spill,
    /// A spill product. Never evicted, never split; failure to assign
    /// is fatal.
    Done,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ExtraRegInfo {
    pub stage: Stage,
    /// Eviction generation, 0 while the register has never evicted.
    pub cascade: u32,
}

impl Default for ExtraRegInfo {
    fn default() -> Self {
        ExtraRegInfo {
            stage: Stage::New,
            cascade: 0,
        }
    }
}

/// Lexicographic cost of one candidate eviction: broken allocation
/// hints first, heaviest evicted weight second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct EvictionCost {
    pub broken_hints: u32,
    pub max_weight: f32,
}

impl EvictionCost {
    fn zero() -> Self {
        EvictionCost {
            broken_hints: 0,
            max_weight: 0.0,
        }
    }

    fn max() -> Self {
        EvictionCost {
            broken_hints: u32::MAX,
            max_weight: f32::INFINITY,
        }
    }

    fn less_than(&self, other: &EvictionCost) -> bool {
        if self.broken_hints != other.broken_hints {
            return self.broken_hints < other.broken_hints;
        }
        self.max_weight < other.max_weight
    }
}

/// Max-heap entry; among equal priorities the higher register number
/// (the most recently created) is popped first.
#[derive(Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    prio: u32,
    reg: VReg,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.prio
            .cmp(&other.prio)
            .then(self.reg.vreg().cmp(&other.reg.vreg()))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Where a value lives, before final locations are known. Resolved to
/// an [`Allocation`] once the queue drains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Place {
    Reg(VReg),
    Slot(SpillSlot),
}

/// A copy/reload/store to materialize later, with endpoints still
/// named symbolically.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PendingEdit {
    pub pos: crate::slots::SlotIndex,
    pub from: Place,
    pub to: Place,
}

pub(crate) struct GreedyAllocator<'a> {
    pub(crate) func: &'a mut MachineFunction,
    pub(crate) env: &'a MachineEnv,
    pub(crate) indexes: SlotIndexes,
    /// One interval per virtual register number; grows as splitting
    /// and spilling create registers. Retired registers hold an empty
    /// interval.
    pub(crate) intervals: Vec<LiveInterval>,
    pub(crate) info: Vec<ExtraRegInfo>,
    pub(crate) matrix: LiveRegMatrix,
    queue: BinaryHeap<QueueEntry>,
    pub(crate) edits: Vec<PendingEdit>,
    pub(crate) slots: spill::SlotAllocator,
    /// Stack slot per spilled register, invalid otherwise.
    pub(crate) spill_slots: Vec<SpillSlot>,
    next_cascade: u32,
    pub(crate) stats: Stats,
}

pub(crate) fn run(
    func: &mut MachineFunction,
    env: &MachineEnv,
    options: &Options,
) -> Result<Output, RegAllocError> {
    let mut alloc = GreedyAllocator::new(func, env)?;
    alloc.allocate(options)?;
    Ok(alloc.finish())
}

impl<'a> GreedyAllocator<'a> {
    pub(crate) fn new(
        func: &'a mut MachineFunction,
        env: &'a MachineEnv,
    ) -> Result<Self, RegAllocError> {
        func.validate()?;
        let indexes = SlotIndexes::compute(func);
        let mut intervals = liveness::compute_intervals(func, &indexes)?;
        for li in intervals.iter_mut() {
            weights::compute_spill_weight(li, func, &indexes);
        }

        let mut matrix = LiveRegMatrix::new(func.num_vregs());
        for i in 0..func.num_insts() {
            let inst = Inst::new(i);
            let base = indexes.inst_index(inst);
            for &preg in func.inst_clobbers(inst) {
                matrix.add_fixed(preg, base.register_slot(false), base.dead_slot());
            }
        }

        let num_vregs = func.num_vregs();
        Ok(GreedyAllocator {
            func,
            env,
            indexes,
            intervals,
            info: vec![ExtraRegInfo::default(); num_vregs],
            matrix,
            queue: BinaryHeap::new(),
            edits: Vec::new(),
            slots: spill::SlotAllocator::new(),
            spill_slots: vec![SpillSlot::invalid(); num_vregs],
            next_cascade: 1,
            stats: Stats::default(),
        })
    }

    pub(crate) fn allocate(&mut self, options: &Options) -> Result<(), RegAllocError> {
        self.stats.num_intervals = self.intervals.len();
        for i in 0..self.intervals.len() {
            if !self.intervals[i].is_empty() {
                let vreg = self.func.vreg(i);
                self.enqueue(vreg);
            }
        }

        while let Some(entry) = self.queue.pop() {
            self.stats.queue_pops += 1;
            let vreg = entry.reg;
            if self.intervals[vreg.vreg()].is_empty() {
                continue;
            }
            trace!(
                "dequeued {} prio {:#x}: {}",
                vreg,
                entry.prio,
                self.intervals[vreg.vreg()]
            );
            let mut new_vregs: SmallVec<[VReg; 4]> = SmallVec::new();
            if let Some(preg) = self.select_or_split(vreg, &mut new_vregs)? {
                self.matrix.assign(&self.intervals[vreg.vreg()], preg);
            }
            for v in new_vregs {
                self.enqueue(v);
            }
            if options.validate {
                for li in self.intervals.iter() {
                    if !li.is_empty() {
                        li.verify();
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> Output {
        let num_vregs = self.func.num_vregs();
        let mut allocs = vec![Allocation::None; num_vregs];
        for i in 0..num_vregs {
            let vreg = self.func.vreg(i);
            if self.matrix.is_assigned(vreg) {
                allocs[i] = Allocation::Reg(self.matrix.preg_of(vreg));
            } else if self.spill_slots[i].is_valid() {
                allocs[i] = Allocation::Stack(self.spill_slots[i]);
            }
        }

        let resolve = |place: Place| -> Allocation {
            match place {
                Place::Reg(v) => allocs[v.vreg()],
                Place::Slot(s) => Allocation::Stack(s),
            }
        };
        let mut edits = Vec::with_capacity(self.edits.len());
        for pe in &self.edits {
            let from = resolve(pe.from);
            let to = resolve(pe.to);
            // Dead endpoints and same-location moves have nothing to
            // do.
            if from.is_some() && to.is_some() && from != to {
                edits.push(Edit::Move {
                    pos: pe.pos,
                    from,
                    to,
                });
            }
        }
        edits.sort_by_key(|e| match e {
            Edit::Move { pos, .. } => *pos,
        });

        let mut stats = self.stats;
        stats.edits = edits.len();
        Output {
            allocs,
            edits,
            num_spillslots: self.slots.num_slots(),
            stats,
        }
    }

    pub(crate) fn enqueue(&mut self, vreg: VReg) {
        let idx = vreg.vreg();
        debug_assert!(!self.intervals[idx].is_empty());
        if self.info[idx].stage == Stage::New {
            self.info[idx].stage = Stage::Assign;
        }
        let size = self.intervals[idx].size();
        let prio = if self.info[idx].stage == Stage::Split {
            // Deferred registers wait for everyone else; long ranges
            // split around the most settled picture.
            size
        } else {
            let mut prio = (1u32 << 31) | size.min((1 << 30) - 1);
            if self.func.hint(vreg).is_valid() {
                prio |= 1 << 30;
            }
            prio
        };
        trace!(
            "enqueue {} prio {:#x} stage {:?}",
            vreg,
            prio,
            self.info[idx].stage
        );
        self.queue.push(QueueEntry { prio, reg: vreg });
    }

    pub(crate) fn set_stage(&mut self, vreg: VReg, stage: Stage) {
        debug_assert!(
            stage >= self.info[vreg.vreg()].stage,
            "stage went backwards"
        );
        self.info[vreg.vreg()].stage = stage;
    }

    /// One queue step for `vreg`: a register to assign it to, or
    /// `None` with any replacement registers pushed to `new_vregs`
    /// (possibly `vreg` itself, requeued at a later stage).
    fn select_or_split(
        &mut self,
        vreg: VReg,
        new_vregs: &mut SmallVec<[VReg; 4]>,
    ) -> Result<Option<PReg>, RegAllocError> {
        let stage = self.info[vreg.vreg()].stage;

        if let Some(preg) = self.try_assign(vreg) {
            self.stats.assigned_direct += 1;
            return Ok(Some(preg));
        }

        // A register already deferred once does not get a second
        // unconditional eviction pass; that would thrash.
        if stage != Stage::Split {
            if let Some(preg) = self.try_evict(vreg, u8::MAX) {
                return Ok(Some(preg));
            }
        }

        if stage < Stage::Split {
            // Defer: the rest of the queue improves the interference
            // picture this register will split around.
            self.set_stage(vreg, Stage::Split);
            new_vregs.push(vreg);
            return Ok(None);
        }

        if stage < Stage::Spill && self.try_split(vreg, new_vregs) {
            return Ok(None);
        }

        let li = &self.intervals[vreg.vreg()];
        if stage >= Stage::Done || !li.is_spillable() {
            return Err(RegAllocError::CannotAllocate(vreg, li.begin_index()));
        }
        self.spill(vreg, new_vregs);
        Ok(None)
    }

    /// Find a register with no interference at all. The hint is taken
    /// whenever it is free; otherwise the cheapest free register wins,
    /// after a shot at clearing the hint with a one-broken-hint
    /// eviction budget.
    fn try_assign(&mut self, vreg: VReg) -> Option<PReg> {
        let hint = self.func.hint(vreg);
        let mut found: Option<(PReg, u8)> = None;
        let mut order = AllocationOrder::new(self.env, vreg.class(), hint, vreg.vreg());
        {
            let li = &self.intervals[vreg.vreg()];
            while let Some(preg) = order.next() {
                if self.matrix.check_interference(li, preg) != InterferenceKind::None {
                    continue;
                }
                let cost = self.env.cost_per_use(preg);
                if order.is_hint(preg) || cost == 0 {
                    return Some(preg);
                }
                match found {
                    Some((_, best)) if best <= cost => {}
                    _ => found = Some((preg, cost)),
                }
            }
        }
        let (preg, cost) = found?;

        if hint.is_valid() {
            // The hint is occupied but a cheap eviction may still
            // recover it.
            let budget = EvictionCost {
                broken_hints: 1,
                max_weight: self.intervals[vreg.vreg()].weight,
            };
            if self
                .can_evict_interference(vreg, hint, true, &budget)
                .is_some()
            {
                self.do_evictions(vreg, hint);
                return Some(hint);
            }
        }

        // Only a costly register is free; see whether a cheaper one
        // can be had by eviction before paying its first-use price.
        if cost > order.min_cost(self.env) {
            if let Some(cheap) = self.try_evict(vreg, cost) {
                return Some(cheap);
            }
        }
        Some(preg)
    }

    /// Find the register whose interference is cheapest to evict, and
    /// evict it. `cost_limit` restricts the scan to registers with a
    /// smaller per-use cost (`u8::MAX` means no restriction).
    fn try_evict(&mut self, vreg: VReg, cost_limit: u8) -> Option<PReg> {
        let hint = self.func.hint(vreg);
        let mut best: Option<PReg> = None;
        let mut best_cost = EvictionCost::max();
        best_cost.max_weight = self.intervals[vreg.vreg()].weight;

        let mut order = AllocationOrder::new(self.env, vreg.class(), hint, vreg.vreg());
        while let Some(preg) = order.next() {
            if cost_limit != u8::MAX && self.env.cost_per_use(preg) >= cost_limit {
                continue;
            }
            let is_hint = order.is_hint(preg);
            if let Some(cost) = self.can_evict_interference(vreg, preg, is_hint, &best_cost) {
                best = Some(preg);
                best_cost = cost;
                // The hint comes first in the order; nothing beats
                // getting it.
                if is_hint {
                    break;
                }
            }
        }

        let preg = best?;
        self.do_evictions(vreg, preg);
        Some(preg)
    }

    /// Whether every register assigned to `preg` in the way of `vreg`
    /// may be evicted, and what that costs. Costs accumulate per
    /// interfering register and the attempt aborts as soon as they
    /// reach `max_cost`.
    fn can_evict_interference(
        &self,
        vreg: VReg,
        preg: PReg,
        is_hint: bool,
        max_cost: &EvictionCost,
    ) -> Option<EvictionCost> {
        let li = &self.intervals[vreg.vreg()];
        if self.matrix.check_interference(li, preg) == InterferenceKind::RegMask {
            return None;
        }
        let (vregs, cut_off) = self
            .matrix
            .collect_interfering_vregs(li, preg, MAX_INTERFERING_VREGS);
        if cut_off {
            return None;
        }

        let cascade = match self.info[vreg.vreg()].cascade {
            0 => self.next_cascade,
            c => c,
        };
        let mut cost = EvictionCost::zero();
        for &other in vregs.iter().rev() {
            let other_li = &self.intervals[other.vreg()];
            let other_info = self.info[other.vreg()];
            // Spill products stay put.
            if other_info.stage == Stage::Done {
                return None;
            }
            // An unspillable register must get *some* register; it may
            // displace a spillable one even against cascade order, at
            // a punitive price.
            let urgent = !li.is_spillable() && other_li.is_spillable();
            if cascade <= other_info.cascade {
                if !urgent {
                    return None;
                }
                cost.broken_hints += URGENT_EVICT_PENALTY;
            }
            let other_hint = self.func.hint(other);
            let breaks_hint = other_hint.is_valid() && self.matrix.preg_of(other) == other_hint;
            cost.broken_hints += breaks_hint as u32;
            cost.max_weight = cost.max_weight.max(other_li.weight);
            if !cost.less_than(max_cost) {
                return None;
            }
            if urgent {
                continue;
            }
            // Follow hints aggressively while the displaced register
            // can still be split; otherwise plain weight order decides.
            let can_split = other_info.stage < Stage::Spill;
            if !(can_split && is_hint && !breaks_hint) && !(li.weight > other_li.weight) {
                return None;
            }
        }
        Some(cost)
    }

    /// Unassign everything in the way of `vreg` on `preg` and requeue
    /// it, stamped with `vreg`'s cascade.
    fn do_evictions(&mut self, vreg: VReg, preg: PReg) {
        if self.info[vreg.vreg()].cascade == 0 {
            self.info[vreg.vreg()].cascade = self.next_cascade;
            self.next_cascade += 1;
        }
        let cascade = self.info[vreg.vreg()].cascade;

        let (vregs, cut_off) = self.matrix.collect_interfering_vregs(
            &self.intervals[vreg.vreg()],
            preg,
            MAX_INTERFERING_VREGS,
        );
        debug_assert!(!cut_off, "evicting unexamined interference");
        for &other in vregs.iter() {
            let other_hint = self.func.hint(other);
            if other_hint.is_valid() && self.matrix.preg_of(other) == other_hint {
                self.stats.broken_hints += 1;
            }
            trace!("evicting {} from {} for {}", other, preg, vreg);
            self.matrix.unassign(&self.intervals[other.vreg()]);
            self.info[other.vreg()].cascade = cascade;
            self.stats.evictions += 1;
            self.enqueue(other);
        }
        debug_assert_eq!(
            self.matrix
                .check_interference(&self.intervals[vreg.vreg()], preg),
            InterferenceKind::None
        );
    }

    /// Split escalation: local intervals split within their block,
    /// then per instruction; global intervals split by region, then by
    /// block. Returns whether replacement registers were queued.
    fn try_split(&mut self, vreg: VReg, new_vregs: &mut SmallVec<[VReg; 4]>) -> bool {
        let stage = self.info[vreg.vreg()].stage;
        let local = {
            let li = &self.intervals[vreg.vreg()];
            self.indexes.block_containing(li.begin_index())
                == self.indexes.block_containing(li.end_index().prev_slot())
        };

        if local {
            if self.try_local_split(vreg, new_vregs) {
                return true;
            }
            if stage == Stage::Split2 {
                return self.try_instruction_split(vreg, new_vregs);
            }
            // No beneficial boundary found yet; come back under the
            // stricter progress rules.
            self.set_stage(vreg, Stage::Split2);
            new_vregs.push(vreg);
            return true;
        }

        if stage < Stage::Split2 && self.try_region_split(vreg, new_vregs) {
            return true;
        }
        self.try_block_split(vreg, new_vregs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::func::Operand;
    use crate::slots::{Slot, SlotIndex};
    use crate::RegClass;

    fn int_env(num_regs: usize) -> MachineEnv {
        let mut env = MachineEnv::default();
        env.preferred_regs_by_class[RegClass::Int as usize] =
            (0..num_regs).map(|i| PReg::new(i, RegClass::Int)).collect();
        env
    }

    fn b(inst: usize) -> SlotIndex {
        SlotIndex::new(Inst::new(inst), Slot::Block)
    }

    #[test]
    fn disjoint_intervals_share_one_register() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        let v1 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]); // 0
        func.add_inst(&[Operand::reg_use(v0)]); // 1
        func.add_inst(&[Operand::reg_def(v1)]); // 2
        func.add_inst(&[Operand::reg_use(v1)]); // 3
        let env = int_env(1);

        let out = run(&mut func, &env, &Options::default()).unwrap();
        let p0 = PReg::new(0, RegClass::Int);
        assert_eq!(out.allocs[0], Allocation::Reg(p0));
        assert_eq!(out.allocs[1], Allocation::Reg(p0));
        assert_eq!(out.stats.evictions, 0);
        assert!(out.edits.is_empty());
        assert_eq!(out.num_spillslots, 0);
    }

    #[test]
    fn heavier_interval_evicts_lighter() {
        let mut func = MachineFunction::new();
        let light = func.create_vreg(RegClass::Int);
        let heavy = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(light)]); // 0
        func.add_inst(&[Operand::reg_def(heavy)]); // 1
        func.add_inst(&[Operand::reg_use(heavy)]); // 2
        func.add_inst(&[Operand::reg_use(heavy)]); // 3
        for _ in 4..12 {
            func.add_inst(&[]);
        }
        func.add_inst(&[Operand::reg_use(light)]); // 12
        let env = int_env(1);
        let p0 = PReg::new(0, RegClass::Int);

        let mut alloc = GreedyAllocator::new(&mut func, &env).unwrap();
        assert!(alloc.intervals[heavy.vreg()].weight > alloc.intervals[light.vreg()].weight);

        // Give the register to the light interval first.
        let mut new_vregs: SmallVec<[VReg; 4]> = SmallVec::new();
        let got = alloc.select_or_split(light, &mut new_vregs).unwrap();
        assert_eq!(got, Some(p0));
        alloc.matrix.assign(&alloc.intervals[light.vreg()], p0);

        // The heavier interval takes it back.
        let got = alloc.select_or_split(heavy, &mut new_vregs).unwrap();
        assert_eq!(got, Some(p0));
        assert_eq!(alloc.stats.evictions, 1);
        // The evictor started a cascade; the evictee carries its stamp
        // and is requeued at the Assign stage.
        assert_eq!(alloc.info[heavy.vreg()].cascade, 1);
        assert_eq!(alloc.info[light.vreg()].cascade, 1);
        assert_eq!(alloc.info[light.vreg()].stage, Stage::Assign);
        // Eviction safety: the register is now genuinely free.
        assert_eq!(
            alloc
                .matrix
                .check_interference(&alloc.intervals[heavy.vreg()], p0),
            InterferenceKind::None
        );
    }

    #[test]
    fn lighter_interval_cannot_evict_heavier() {
        let mut func = MachineFunction::new();
        let heavy = func.create_vreg(RegClass::Int);
        let light = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(heavy)]); // 0
        func.add_inst(&[Operand::reg_use(heavy)]); // 1
        func.add_inst(&[Operand::reg_def(light), Operand::reg_use(heavy)]); // 2
        for _ in 3..10 {
            func.add_inst(&[]);
        }
        func.add_inst(&[Operand::reg_use(light), Operand::reg_use(heavy)]); // 10
        let env = int_env(1);
        let p0 = PReg::new(0, RegClass::Int);

        let mut alloc = GreedyAllocator::new(&mut func, &env).unwrap();
        alloc.matrix.assign(&alloc.intervals[heavy.vreg()], p0);
        assert!(alloc.try_evict(light, u8::MAX).is_none());
        assert_eq!(alloc.stats.evictions, 0);
    }

    #[test]
    fn hint_is_respected() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        let v1 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]);
        func.add_inst(&[Operand::reg_def(v1)]);
        func.add_inst(&[Operand::reg_use(v0), Operand::reg_use(v1)]);
        let p1 = PReg::new(1, RegClass::Int);
        func.set_hint(v1, p1);
        let env = int_env(2);

        let out = run(&mut func, &env, &Options::default()).unwrap();
        assert_eq!(out.allocs[v1.vreg()], Allocation::Reg(p1));
        assert_ne!(out.allocs[v0.vreg()], Allocation::Reg(p1));
    }

    #[test]
    fn splits_around_a_clobber() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]); // 0
        func.add_inst(&[]); // 1
        func.add_inst(&[]); // 2
        func.add_inst(&[Operand::reg_use(v0)]); // 3
        let call = func.add_inst(&[]); // 4
        let p0 = PReg::new(0, RegClass::Int);
        func.set_clobbers(call, &[p0]);
        for _ in 5..8 {
            func.add_inst(&[]);
        }
        func.add_inst(&[Operand::reg_use(v0)]); // 8
        let env = int_env(1);

        let out = run(&mut func, &env, &Options { validate: true }).unwrap();
        // The value sits in a stack slot across the call and comes
        // back for the last use.
        assert_eq!(out.num_spillslots, 1);
        let slot = SpillSlot::new(0);
        assert_eq!(
            out.edits,
            vec![
                Edit::Move {
                    pos: b(4),
                    from: Allocation::Reg(p0),
                    to: Allocation::Stack(slot),
                },
                Edit::Move {
                    pos: b(8),
                    from: Allocation::Stack(slot),
                    to: Allocation::Reg(p0),
                },
            ]
        );
        // Both halves live in the register around their uses.
        assert_eq!(out.allocs[v0.vreg()], Allocation::None);
        assert!(out
            .allocs
            .iter()
            .filter(|a| **a == Allocation::Reg(p0))
            .count()
            >= 2);
    }

    #[test]
    fn boundary_copies_follow_resplit_children() {
        let mut func = MachineFunction::new();
        let v0 = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(v0)]); // 0
        for _ in 1..8 {
            func.add_inst(&[]);
        }
        func.add_inst(&[Operand::reg_use(v0)]); // 8
        let env = int_env(2);
        let p0 = PReg::new(0, RegClass::Int);
        let p1 = PReg::new(1, RegClass::Int);

        let mut alloc = GreedyAllocator::new(&mut func, &env).unwrap();
        let (begin, end) = {
            let li = &alloc.intervals[v0.vreg()];
            (li.begin_index(), li.end_index())
        };

        // First split records a boundary copy c0 -> c1 at b(5).
        let first =
            alloc.split_interval_at_ranges(v0, &[vec![(begin, b(5))], vec![(b(5), end)]]);
        let (c0, c1) = (first[0], first[1]);
        assert_eq!(alloc.edits.len(), 1);
        assert_eq!(alloc.edits[0].from, Place::Reg(c0));
        assert_eq!(alloc.edits[0].to, Place::Reg(c1));

        // Re-splitting c0 must hand that copy's source to the child
        // that is live into b(5).
        let second =
            alloc.split_interval_at_ranges(c0, &[vec![(begin, b(3))], vec![(b(3), b(5))]]);
        let (g0, g1) = (second[0], second[1]);
        assert!(alloc
            .edits
            .iter()
            .all(|pe| pe.from != Place::Reg(c0) && pe.to != Place::Reg(c0)));

        alloc.matrix.assign(&alloc.intervals[g0.vreg()], p0);
        alloc.matrix.assign(&alloc.intervals[g1.vreg()], p1);
        alloc.matrix.assign(&alloc.intervals[c1.vreg()], p0);
        let out = alloc.finish();
        // Both copies survive resolution: the new cut at b(3) and the
        // original boundary at b(5).
        assert_eq!(
            out.edits,
            vec![
                Edit::Move {
                    pos: b(3),
                    from: Allocation::Reg(p0),
                    to: Allocation::Reg(p1),
                },
                Edit::Move {
                    pos: b(5),
                    from: Allocation::Reg(p1),
                    to: Allocation::Reg(p0),
                },
            ]
        );
    }

    #[test]
    fn terminates_under_pressure_and_spills() {
        let mut func = MachineFunction::new();
        let a = func.create_vreg(RegClass::Int);
        let b = func.create_vreg(RegClass::Int);
        let c = func.create_vreg(RegClass::Int);
        func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(a)]); // 0
        func.add_inst(&[Operand::reg_def(b)]); // 1
        func.add_inst(&[Operand::reg_def(c)]); // 2
        func.add_inst(&[Operand::reg_use(a)]); // 3
        func.add_inst(&[Operand::reg_use(b)]); // 4
        func.add_inst(&[Operand::reg_use(c)]); // 5
        func.add_inst(&[Operand::reg_use(a)]); // 6
        func.add_inst(&[Operand::reg_use(b)]); // 7
        func.add_inst(&[Operand::reg_use(c)]); // 8
        let env = int_env(1);

        let out = run(&mut func, &env, &Options { validate: true }).unwrap();
        assert!(out.num_spillslots >= 1);
        // Every register still referenced by an instruction ended up
        // somewhere.
        for i in 0..func.num_vregs() {
            if !func.insts_of(func.vreg(i)).is_empty() {
                assert!(out.allocs[i].is_some(), "v{} has no location", i);
            }
        }
        // Edits come out sorted.
        let positions: Vec<_> = out
            .edits
            .iter()
            .map(|e| match e {
                Edit::Move { pos, .. } => *pos,
            })
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn region_split_frees_the_live_through_block() {
        let mut func = MachineFunction::new();
        let long = func.create_vreg(RegClass::Int);
        let inner = func.create_vreg(RegClass::Int);
        let b0 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_def(long)]); // 0
        let b1 = func.add_block(10.0);
        func.add_inst(&[Operand::reg_def(inner)]); // 1
        func.add_inst(&[Operand::reg_use(inner)]); // 2
        func.add_inst(&[Operand::reg_use(inner)]); // 3
        let b2 = func.add_block(1.0);
        func.add_inst(&[Operand::reg_use(long)]); // 4
        func.add_edge(b0, b1);
        func.add_edge(b1, b2);
        let env = int_env(1);
        let p0 = PReg::new(0, RegClass::Int);

        let out = run(&mut func, &env, &Options { validate: true }).unwrap();
        // The hot inner register keeps the physical register; the long
        // range is carried across the middle block in a stack slot.
        assert_eq!(out.allocs[inner.vreg()], Allocation::Reg(p0));
        assert!(out.stats.evictions >= 1);
        assert!(out.stats.region_splits + out.stats.block_splits >= 1);
        assert_eq!(out.num_spillslots, 1);
        assert!(out.edits.len() >= 2);
        for i in 0..func.num_vregs() {
            if !func.insts_of(func.vreg(i)).is_empty() {
                assert!(out.allocs[i].is_some(), "v{} has no location", i);
            }
        }
    }
}
