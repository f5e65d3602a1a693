//! Connected components of values within one live interval.
//!
//! After splitting or rematerialization an interval can fall apart
//! into values that never flow into each other; each component can
//! then live in its own virtual register. [`ConnectedValNos::classify`]
//! finds the components and [`ConnectedValNos::distribute`] performs
//! the partition, rewriting every affected operand.

use crate::func::MachineFunction;
use crate::interval::{LiveInterval, Segment, ValNo};
use crate::slots::SlotIndexes;

/// Equivalence classes over small dense integers: an array-backed
/// union-find that unions toward the smaller leader, then compresses
/// into dense class numbers ordered by smallest member.
#[derive(Clone, Debug, Default)]
pub struct EqClasses {
    ec: Vec<u32>,
    /// Zero until `compress` runs.
    num_classes: u32,
}

impl EqClasses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.ec.clear();
        self.num_classes = 0;
    }

    pub fn grow(&mut self, n: usize) {
        debug_assert_eq!(self.num_classes, 0, "grow() called after compress()");
        while self.ec.len() < n {
            let i = self.ec.len() as u32;
            self.ec.push(i);
        }
    }

    /// Union the classes of `a` and `b`, compressing the walked paths
    /// toward the smaller leader.
    pub fn join(&mut self, a: u32, b: u32) -> u32 {
        debug_assert_eq!(self.num_classes, 0, "join() called after compress()");
        let (mut a, mut b) = (a as usize, b as usize);
        let mut eca = self.ec[a];
        let mut ecb = self.ec[b];
        while eca != ecb {
            if eca < ecb {
                self.ec[b] = eca;
                b = ecb as usize;
                ecb = self.ec[b];
            } else {
                self.ec[a] = ecb;
                a = eca as usize;
                eca = self.ec[a];
            }
        }
        eca
    }

    pub fn find_leader(&self, mut a: u32) -> u32 {
        debug_assert_eq!(self.num_classes, 0, "find_leader() called after compress()");
        while self.ec[a as usize] != a {
            a = self.ec[a as usize];
        }
        a
    }

    /// Renumber leaders to dense class ids. Class 0 always contains
    /// element 0.
    pub fn compress(&mut self) {
        if self.num_classes != 0 {
            return;
        }
        for i in 0..self.ec.len() {
            self.ec[i] = if self.ec[i] == i as u32 {
                let c = self.num_classes;
                self.num_classes += 1;
                c
            } else {
                self.ec[self.ec[i] as usize]
            };
        }
    }

    pub fn num_classes(&self) -> usize {
        debug_assert!(self.ec.is_empty() || self.num_classes > 0);
        self.num_classes as usize
    }

    /// Dense class id of an element, valid after `compress`.
    pub fn class_of(&self, i: u32) -> usize {
        debug_assert!(self.num_classes > 0, "class_of() called before compress()");
        self.ec[i as usize] as usize
    }
}

/// Classifier for the values of one interval.
#[derive(Clone, Debug, Default)]
pub struct ConnectedValNos {
    eq: EqClasses,
}

impl ConnectedValNos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the connected components of `li`'s values and return
    /// their number. Two values connect when one is a PHI-like merge
    /// of the other (the value is live out of a predecessor block into
    /// the merge) or when a definition coincides with the end of the
    /// previous value (a two-address style redefinition). Unused
    /// values are lumped into one class and attached to the last used
    /// value so they never get a register of their own.
    pub fn classify(
        &mut self,
        li: &LiveInterval,
        func: &MachineFunction,
        indexes: &SlotIndexes,
    ) -> usize {
        self.eq.clear();
        self.eq.grow(li.num_val_nums());

        let mut used: Option<ValNo> = None;
        let mut unused: Option<ValNo> = None;

        for vn in li.valnos() {
            if vn.is_unused() {
                if let Some(u) = unused {
                    self.eq.join(u.raw_u32(), vn.id.raw_u32());
                }
                unused = Some(vn.id);
                continue;
            }
            used = Some(vn.id);
            if vn.is_phi_def() {
                let block = indexes.block_containing(vn.def);
                debug_assert_eq!(indexes.block_start(block), vn.def);
                for &pred in func.block_preds(block) {
                    if let Some(pv) = li.value_before(indexes.block_end(pred)) {
                        self.eq.join(vn.id.raw_u32(), pv.raw_u32());
                    }
                }
            } else {
                // A value defined exactly where another ends is a
                // redefinition of it.
                if let Some(uv) = li.value_before(vn.def) {
                    self.eq.join(vn.id.raw_u32(), uv.raw_u32());
                }
            }
        }

        if let (Some(u), Some(x)) = (used, unused) {
            self.eq.join(u.raw_u32(), x.raw_u32());
        }

        self.eq.compress();
        self.eq.num_classes()
    }

    pub fn class_of(&self, v: ValNo) -> usize {
        self.eq.class_of(v.raw_u32())
    }

    /// Partition `intervals[0]` into the classified components.
    /// `intervals[1..]` must be fresh, empty intervals (one per extra
    /// class) whose registers already exist in `func`. Class 0 keeps
    /// the original register; every operand of the original register
    /// whose value belongs to another class is rewritten.
    pub fn distribute(
        &self,
        intervals: &mut [LiveInterval],
        func: &mut MachineFunction,
        indexes: &SlotIndexes,
    ) {
        debug_assert_eq!(intervals.len(), self.eq.num_classes());
        debug_assert!(intervals[1..].iter().all(|iv| iv.is_empty()));

        // Rewrite operands first, before value ids change. Uses go to
        // the component whose value they read; defs to the component
        // whose value they create.
        let reg = intervals[0].reg;
        let ops: Vec<_> = func.operands_of(reg).collect();
        for (idx, inst, op) in ops {
            let at = indexes.inst_index(inst);
            let vni = if op.is_use() {
                intervals[0].value_in(at)
            } else {
                intervals[0].value_defined_at(at)
            };
            let vni = match vni {
                Some(v) => v,
                // An operand with no reaching value keeps the original
                // register.
                None => continue,
            };
            let eq = self.class_of(vni);
            if eq != 0 {
                let target = intervals[eq].reg;
                func.set_operand_reg(idx, target);
            }
        }

        // Transfer values to their new owners, renumbering densely per
        // owner in original order.
        let old_segments = std::mem::take(&mut intervals[0].segments);
        let old_valnos = std::mem::take(&mut intervals[0].valnos);

        let mut new_id = vec![ValNo::invalid(); old_valnos.len()];
        for (i, vn) in old_valnos.iter().enumerate() {
            let c = self.eq.class_of(i as u32);
            let mut vn = *vn;
            vn.id = ValNo::new(intervals[c].valnos.len());
            new_id[i] = vn.id;
            intervals[c].valnos.push(vn);
        }

        for seg in old_segments {
            let c = self.class_of(seg.valno);
            debug_assert!(
                intervals[c].is_empty() || c == 0 || intervals[c].expired_at(seg.start),
                "new intervals should grow in order"
            );
            intervals[c].segments.push(Segment {
                valno: new_id[seg.valno.index()],
                ..seg
            });
        }

        if cfg!(debug_assertions) {
            for iv in intervals.iter() {
                iv.verify();
            }
        }
    }
}
