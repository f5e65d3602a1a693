//! Program points.
//!
//! Every instruction owns four consecutive slots in a single dense
//! index space, ordered `Block < EarlyClobber < Register < Dead`.
//! Values read by an instruction are live up to its `Register` slot;
//! normal definitions begin at `Register`; early-clobber definitions
//! begin at `EarlyClobber`; a definition that is never read ends at
//! `Dead`. The `Block` slot of a block's first instruction is where
//! live-in values (and PHI definitions) begin.
//!
//! Instructions are numbered once per function and never renumbered;
//! all later transformations are expressed as edits at existing
//! points.

use crate::func::MachineFunction;
use crate::index::{Block, Inst, InstRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
#[repr(u8)]
pub enum Slot {
    Block = 0,
    EarlyClobber = 1,
    Register = 2,
    Dead = 3,
}

/// A point in the program: an instruction plus a sub-slot, packed into
/// 32 bits so that the natural integer order is program order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct SlotIndex {
    bits: u32,
}

/// Distance between the same slots of adjacent instructions.
pub const INSTR_DIST: u32 = 4;

impl SlotIndex {
    #[inline(always)]
    pub fn new(inst: Inst, slot: Slot) -> Self {
        debug_assert!(inst.raw_u32() <= u32::MAX >> 2);
        SlotIndex {
            bits: (inst.raw_u32() << 2) | (slot as u8 as u32),
        }
    }

    #[inline(always)]
    pub fn inst(self) -> Inst {
        Inst(self.bits >> 2)
    }

    #[inline(always)]
    pub fn slot(self) -> Slot {
        match self.bits & 3 {
            0 => Slot::Block,
            1 => Slot::EarlyClobber,
            2 => Slot::Register,
            _ => Slot::Dead,
        }
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        SlotIndex { bits: u32::MAX }
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }

    #[inline(always)]
    pub fn is_block(self) -> bool {
        self.bits & 3 == Slot::Block as u32
    }

    #[inline(always)]
    pub fn is_early_clobber(self) -> bool {
        self.bits & 3 == Slot::EarlyClobber as u32
    }

    #[inline(always)]
    pub fn is_register(self) -> bool {
        self.bits & 3 == Slot::Register as u32
    }

    #[inline(always)]
    pub fn is_dead(self) -> bool {
        self.bits & 3 == Slot::Dead as u32
    }

    /// The `Block` slot of this instruction.
    #[inline(always)]
    pub fn base_index(self) -> Self {
        SlotIndex {
            bits: self.bits & !3,
        }
    }

    /// The `Dead` slot of this instruction, the last of its four.
    #[inline(always)]
    pub fn boundary_index(self) -> Self {
        SlotIndex {
            bits: self.bits | 3,
        }
    }

    /// The slot where a definition by this instruction begins.
    #[inline(always)]
    pub fn register_slot(self, early_clobber: bool) -> Self {
        let slot = if early_clobber {
            Slot::EarlyClobber
        } else {
            Slot::Register
        };
        SlotIndex {
            bits: (self.bits & !3) | slot as u8 as u32,
        }
    }

    #[inline(always)]
    pub fn dead_slot(self) -> Self {
        self.boundary_index()
    }

    #[inline(always)]
    pub fn next_slot(self) -> Self {
        debug_assert!(self.is_valid());
        SlotIndex {
            bits: self.bits + 1,
        }
    }

    #[inline(always)]
    pub fn prev_slot(self) -> Self {
        debug_assert!(self.bits > 0);
        SlotIndex {
            bits: self.bits - 1,
        }
    }

    /// Base index of the next instruction.
    #[inline(always)]
    pub fn next_index(self) -> Self {
        SlotIndex {
            bits: (self.bits & !3) + INSTR_DIST,
        }
    }

    /// Base index of the previous instruction.
    #[inline(always)]
    pub fn prev_index(self) -> Self {
        debug_assert!(self.bits >= INSTR_DIST);
        SlotIndex {
            bits: (self.bits & !3) - INSTR_DIST,
        }
    }

    #[inline(always)]
    pub fn is_same_instr(a: Self, b: Self) -> bool {
        a.bits & !3 == b.bits & !3
    }

    #[inline(always)]
    pub fn is_earlier_instr(a: Self, b: Self) -> bool {
        a.bits & !3 < b.bits & !3
    }

    /// Raw slot distance from `self` to a later index `other`. Used as
    /// a code size proxy when weighing intervals.
    #[inline(always)]
    pub fn distance(self, other: Self) -> u32 {
        debug_assert!(self <= other);
        other.bits - self.bits
    }

    #[inline(always)]
    pub fn raw_u32(self) -> u32 {
        self.bits
    }
}

impl std::fmt::Debug for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if !self.is_valid() {
            return write!(f, "invalid");
        }
        let c = match self.slot() {
            Slot::Block => 'B',
            Slot::EarlyClobber => 'e',
            Slot::Register => 'r',
            Slot::Dead => 'd',
        };
        write!(f, "{}{}", self.inst().index(), c)
    }
}

/// Per-function numbering: maps between instructions, blocks and slot
/// indexes. Built once and immutable for the rest of the run.
#[derive(Clone, Debug)]
pub struct SlotIndexes {
    block_insts: Vec<InstRange>,
    inst_block: Vec<Block>,
    num_insts: usize,
}

impl SlotIndexes {
    pub fn compute(func: &MachineFunction) -> Self {
        let num_insts = func.num_insts();
        let mut block_insts = Vec::with_capacity(func.num_blocks());
        let mut inst_block = vec![Block::invalid(); num_insts];
        for block in 0..func.num_blocks() {
            let block = Block::new(block);
            let insts = func.block_insts(block);
            block_insts.push(insts);
            for inst in insts.iter() {
                inst_block[inst.index()] = block;
            }
        }
        Self {
            block_insts,
            inst_block,
            num_insts,
        }
    }

    #[inline(always)]
    pub fn inst_index(&self, inst: Inst) -> SlotIndex {
        SlotIndex::new(inst, Slot::Block)
    }

    /// First index of the block: the `Block` slot of its first
    /// instruction.
    pub fn block_start(&self, block: Block) -> SlotIndex {
        let insts = self.block_insts[block.index()];
        debug_assert!(insts.len() > 0);
        SlotIndex::new(insts.first(), Slot::Block)
    }

    /// One-past-the-end index of the block: the `Block` slot of the
    /// next block's first instruction.
    pub fn block_end(&self, block: Block) -> SlotIndex {
        let insts = self.block_insts[block.index()];
        debug_assert!(insts.len() > 0);
        SlotIndex::new(insts.last().next(), Slot::Block)
    }

    pub fn block_range(&self, block: Block) -> (SlotIndex, SlotIndex) {
        (self.block_start(block), self.block_end(block))
    }

    /// The block whose range contains `index`.
    pub fn block_containing(&self, index: SlotIndex) -> Block {
        let inst = index.inst();
        if inst.index() >= self.num_insts {
            // Boundary index one past the last instruction.
            return Block::new(self.block_insts.len() - 1);
        }
        self.inst_block[inst.index()]
    }

    pub fn num_blocks(&self) -> usize {
        self.block_insts.len()
    }

    pub fn num_insts(&self) -> usize {
        self.num_insts
    }

    /// Last index of the whole function.
    pub fn last_index(&self) -> SlotIndex {
        SlotIndex::new(Inst::new(self.num_insts), Slot::Block)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slot_order_within_inst() {
        let i = Inst::new(7);
        let b = SlotIndex::new(i, Slot::Block);
        let e = SlotIndex::new(i, Slot::EarlyClobber);
        let r = SlotIndex::new(i, Slot::Register);
        let d = SlotIndex::new(i, Slot::Dead);
        assert!(b < e && e < r && r < d);
        assert!(SlotIndex::is_same_instr(b, d));
        assert_eq!(b.boundary_index(), d);
        assert_eq!(d.base_index(), b);
        assert_eq!(b.register_slot(true), e);
        assert_eq!(b.register_slot(false), r);
        assert!(d < SlotIndex::new(Inst::new(8), Slot::Block));
    }

    #[test]
    fn slot_navigation() {
        let r = SlotIndex::new(Inst::new(3), Slot::Register);
        assert_eq!(r.next_slot().slot(), Slot::Dead);
        assert_eq!(r.prev_slot().slot(), Slot::EarlyClobber);
        assert_eq!(r.next_index(), SlotIndex::new(Inst::new(4), Slot::Block));
        assert_eq!(r.prev_index(), SlotIndex::new(Inst::new(2), Slot::Block));
        assert!(SlotIndex::is_earlier_instr(
            r,
            SlotIndex::new(Inst::new(4), Slot::Block)
        ));
        assert!(!SlotIndex::is_earlier_instr(r, r.dead_slot()));
        assert_eq!(
            SlotIndex::new(Inst::new(0), Slot::Block)
                .distance(SlotIndex::new(Inst::new(2), Slot::Block)),
            2 * INSTR_DIST
        );
    }
}
