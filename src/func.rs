//! The input program representation.
//!
//! A [`MachineFunction`] owns blocks, instructions and a single arena
//! of operand records. Every operand record is linked into a per-
//! register chain so that all reads and writes of a virtual register
//! can be visited without scanning the whole function; rewriting an
//! operand to a different register relinks it. The allocator mutates
//! the function: splitting and spilling create new virtual registers
//! and rewrite operands to use them.

use crate::index::{Block, Inst, InstRange};
use crate::{PReg, RegAllocError, RegClass, VReg};
use smallvec::SmallVec;

define_index!(OperandIdx);

/// Whether an operand reads or writes its register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Def = 0,
    Use = 1,
}

/// A register operand, packed into 32 bits: the virtual register (with
/// its class bit) plus kind and early-clobber flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct Operand {
    bits: u32,
}

impl Operand {
    #[inline(always)]
    pub fn new(vreg: VReg, kind: OperandKind, early_clobber: bool) -> Self {
        let kind_field = kind as u8 as u32;
        let early_field = early_clobber as u32;
        Operand {
            bits: ((vreg.vreg() as u32) << 3)
                | ((vreg.class() as u8 as u32) << 2)
                | (kind_field << 1)
                | early_field,
        }
    }

    #[inline(always)]
    pub fn reg_def(vreg: VReg) -> Self {
        Operand::new(vreg, OperandKind::Def, false)
    }

    #[inline(always)]
    pub fn reg_use(vreg: VReg) -> Self {
        Operand::new(vreg, OperandKind::Use, false)
    }

    #[inline(always)]
    pub fn reg_def_early(vreg: VReg) -> Self {
        Operand::new(vreg, OperandKind::Def, true)
    }

    #[inline(always)]
    pub fn vreg(self) -> VReg {
        let class = if self.bits & 4 == 0 {
            RegClass::Int
        } else {
            RegClass::Float
        };
        VReg::new((self.bits >> 3) as usize, class)
    }

    #[inline(always)]
    pub fn kind(self) -> OperandKind {
        if self.bits & 2 == 0 {
            OperandKind::Def
        } else {
            OperandKind::Use
        }
    }

    #[inline(always)]
    pub fn is_def(self) -> bool {
        self.kind() == OperandKind::Def
    }

    #[inline(always)]
    pub fn is_use(self) -> bool {
        self.kind() == OperandKind::Use
    }

    #[inline(always)]
    pub fn early_clobber(self) -> bool {
        self.bits & 1 != 0
    }

    #[inline(always)]
    fn with_vreg(self, vreg: VReg) -> Self {
        debug_assert_eq!(vreg.class(), self.vreg().class());
        Operand {
            bits: (self.bits & 3)
                | ((vreg.vreg() as u32) << 3)
                | ((vreg.class() as u8 as u32) << 2),
        }
    }
}

impl std::fmt::Debug for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let kind = match self.kind() {
            OperandKind::Def => {
                if self.early_clobber() {
                    "def-early"
                } else {
                    "def"
                }
            }
            OperandKind::Use => "use",
        };
        write!(f, "{}:{}", kind, self.vreg())
    }
}

#[derive(Clone, Debug)]
struct OperandRecord {
    operand: Operand,
    inst: Inst,
    /// Next operand of the same register, or invalid at chain end.
    next: OperandIdx,
}

#[derive(Clone, Debug)]
struct InstData {
    /// Range of this instruction's records in the operand arena.
    operands: InstOperandRange,
    is_copy: bool,
    clobbers: SmallVec<[PReg; 2]>,
}

#[derive(Clone, Copy, Debug)]
struct InstOperandRange {
    start: u32,
    len: u32,
}

#[derive(Clone, Debug)]
struct BlockData {
    insts: InstRange,
    preds: SmallVec<[Block; 2]>,
    succs: SmallVec<[Block; 2]>,
    freq: f32,
}

#[derive(Clone, Debug, Default)]
pub struct MachineFunction {
    blocks: Vec<BlockData>,
    insts: Vec<InstData>,
    operands: Vec<OperandRecord>,
    /// Head of the operand chain per virtual register number.
    chain_head: Vec<OperandIdx>,
    vreg_classes: Vec<RegClass>,
    hints: Vec<PReg>,
}

impl MachineFunction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh virtual register of the given class.
    pub fn create_vreg(&mut self, class: RegClass) -> VReg {
        let vreg = VReg::new(self.vreg_classes.len(), class);
        self.vreg_classes.push(class);
        self.hints.push(PReg::invalid());
        self.chain_head.push(OperandIdx::invalid());
        vreg
    }

    /// Open a new block. Blocks must be created in program order;
    /// instructions added afterwards belong to it until the next
    /// `add_block`.
    pub fn add_block(&mut self, freq: f32) -> Block {
        let start = Inst::new(self.insts.len());
        let block = Block::new(self.blocks.len());
        self.blocks.push(BlockData {
            insts: InstRange::forward(start, start),
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            freq,
        });
        block
    }

    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
    }

    /// Append an instruction to the currently open block.
    pub fn add_inst(&mut self, operands: &[Operand]) -> Inst {
        debug_assert!(!self.blocks.is_empty());
        let inst = Inst::new(self.insts.len());
        let start = self.operands.len() as u32;
        for &operand in operands {
            let vreg = operand.vreg();
            debug_assert!(vreg.vreg() < self.vreg_classes.len());
            debug_assert_eq!(vreg.class(), self.vreg_classes[vreg.vreg()]);
            let idx = OperandIdx::new(self.operands.len());
            self.operands.push(OperandRecord {
                operand,
                inst,
                next: self.chain_head[vreg.vreg()],
            });
            self.chain_head[vreg.vreg()] = idx;
        }
        self.insts.push(InstData {
            operands: InstOperandRange {
                start,
                len: operands.len() as u32,
            },
            is_copy: false,
            clobbers: SmallVec::new(),
        });
        let block = self.blocks.last_mut().unwrap();
        block.insts = InstRange::forward(
            Inst::new(block.insts.iter().next().map_or(inst.index(), |i| i.index())),
            inst.next(),
        );
        inst
    }

    /// Append a register-to-register copy instruction.
    pub fn add_copy(&mut self, to: VReg, from: VReg) -> Inst {
        let inst = self.add_inst(&[Operand::reg_def(to), Operand::reg_use(from)]);
        self.insts[inst.index()].is_copy = true;
        inst
    }

    /// Record physical registers clobbered by an instruction (a call's
    /// caller-save set, for example).
    pub fn set_clobbers(&mut self, inst: Inst, clobbers: &[PReg]) {
        self.insts[inst.index()].clobbers = clobbers.iter().copied().collect();
    }

    pub fn set_hint(&mut self, vreg: VReg, hint: PReg) {
        self.hints[vreg.vreg()] = hint;
    }

    pub fn hint(&self, vreg: VReg) -> PReg {
        self.hints[vreg.vreg()]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    pub fn num_vregs(&self) -> usize {
        self.vreg_classes.len()
    }

    pub fn reg_class(&self, vreg: VReg) -> RegClass {
        self.vreg_classes[vreg.vreg()]
    }

    /// The `VReg` with the given dense number.
    pub fn vreg(&self, index: usize) -> VReg {
        VReg::new(index, self.vreg_classes[index])
    }

    pub fn entry_block(&self) -> Block {
        Block::new(0)
    }

    pub fn block_insts(&self, block: Block) -> InstRange {
        self.blocks[block.index()].insts
    }

    pub fn block_preds(&self, block: Block) -> &[Block] {
        &self.blocks[block.index()].preds
    }

    pub fn block_succs(&self, block: Block) -> &[Block] {
        &self.blocks[block.index()].succs
    }

    /// Estimated execution frequency of the block.
    pub fn block_freq(&self, block: Block) -> f32 {
        self.blocks[block.index()].freq
    }

    pub fn is_copy(&self, inst: Inst) -> bool {
        self.insts[inst.index()].is_copy
    }

    pub fn inst_clobbers(&self, inst: Inst) -> &[PReg] {
        &self.insts[inst.index()].clobbers
    }

    pub fn inst_operands(&self, inst: Inst) -> impl Iterator<Item = (OperandIdx, Operand)> + '_ {
        let range = self.insts[inst.index()].operands;
        (range.start..range.start + range.len)
            .map(move |i| (OperandIdx(i), self.operands[i as usize].operand))
    }

    pub fn operand(&self, idx: OperandIdx) -> Operand {
        self.operands[idx.index()].operand
    }

    pub fn operand_inst(&self, idx: OperandIdx) -> Inst {
        self.operands[idx.index()].inst
    }

    /// Walk all operands of a register, in no particular order.
    pub fn operands_of(&self, vreg: VReg) -> RegOperandIter<'_> {
        RegOperandIter {
            func: self,
            next: self.chain_head[vreg.vreg()],
        }
    }

    /// Instructions with at least one operand on `vreg`, deduplicated.
    pub fn insts_of(&self, vreg: VReg) -> Vec<Inst> {
        let mut insts: Vec<Inst> = self.operands_of(vreg).map(|(_, i, _)| i).collect();
        insts.sort_unstable();
        insts.dedup();
        insts
    }

    /// Rewrite one operand to name a different register, relinking the
    /// record from the old chain into the new one.
    pub fn set_operand_reg(&mut self, idx: OperandIdx, new: VReg) {
        let old = self.operands[idx.index()].operand.vreg();
        if old == new {
            return;
        }
        debug_assert_eq!(old.class(), new.class());
        // Unlink from the old chain.
        let mut cur = self.chain_head[old.vreg()];
        if cur == idx {
            self.chain_head[old.vreg()] = self.operands[idx.index()].next;
        } else {
            loop {
                debug_assert!(cur.is_valid(), "operand not on its register's chain");
                let next = self.operands[cur.index()].next;
                if next == idx {
                    self.operands[cur.index()].next = self.operands[idx.index()].next;
                    break;
                }
                cur = next;
            }
        }
        // Link into the new chain and rewrite the operand.
        self.operands[idx.index()].next = self.chain_head[new.vreg()];
        self.chain_head[new.vreg()] = idx;
        let operand = self.operands[idx.index()].operand;
        self.operands[idx.index()].operand = operand.with_vreg(new);
    }

    /// Basic structural checks: every block has at least one
    /// instruction and edge lists are consistent.
    pub fn validate(&self) -> Result<(), RegAllocError> {
        for (i, block) in self.blocks.iter().enumerate() {
            let b = Block::new(i);
            if block.insts.len() == 0 {
                return Err(RegAllocError::BB(b));
            }
            for &succ in &block.succs {
                if succ.index() >= self.blocks.len()
                    || !self.blocks[succ.index()].preds.contains(&b)
                {
                    return Err(RegAllocError::BB(b));
                }
            }
            for &pred in &block.preds {
                if pred.index() >= self.blocks.len()
                    || !self.blocks[pred.index()].succs.contains(&b)
                {
                    return Err(RegAllocError::BB(b));
                }
            }
        }
        Ok(())
    }
}

pub struct RegOperandIter<'a> {
    func: &'a MachineFunction,
    next: OperandIdx,
}

impl<'a> Iterator for RegOperandIter<'a> {
    type Item = (OperandIdx, Inst, Operand);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_invalid() {
            return None;
        }
        let idx = self.next;
        let record = &self.func.operands[idx.index()];
        self.next = record.next;
        Some((idx, record.inst, record.operand))
    }
}
