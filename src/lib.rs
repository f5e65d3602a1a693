/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! A greedy global register allocator operating on live intervals.
//!
//! The allocator consumes a [`func::MachineFunction`] together with a
//! [`MachineEnv`] describing the allocatable registers, builds one live
//! interval per virtual register, and assigns physical registers by
//! priority order, evicting and splitting intervals when direct
//! assignment fails and spilling as a last resort. The result is a map
//! from virtual registers to allocations plus a list of [`Edit`]s (copy,
//! reload and store points) that materialize the splits and spills.

// Detailed tracing is compiled out entirely unless the `trace-log`
// feature is enabled.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!($($tt)*);
        }
    };
}

#[macro_use]
mod index;
pub use index::{Block, Inst, InstRange, InstRangeIter};

pub mod eqclass;
pub mod func;
pub mod interval;
pub mod slots;
pub mod updater;

pub(crate) mod greedy;
pub(crate) mod liveness;
pub(crate) mod matrix;
pub(crate) mod order;
pub(crate) mod weights;

use slots::SlotIndex;

/// Register classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub enum RegClass {
    Int = 0,
    Float = 1,
}

pub const NUM_REG_CLASSES: usize = 2;

/// A physical register: a hardware encoding plus a class.
///
/// The `hw_enc` number is in a separate space per class (Int register 0
/// is a different register than Float register 0) and must fit in 5
/// bits, i.e. at most 32 registers per class. `index()` maps both
/// classes into one space of 64 slots, with the class bit on top, so
/// per-register tables can be flat arrays.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct PReg {
    hw_enc: u8,
    class: RegClass,
}

impl PReg {
    pub const MAX_BITS: usize = 5;
    pub const MAX: usize = (1 << Self::MAX_BITS) - 1;
    pub const NUM_INDEX: usize = 1 << (Self::MAX_BITS + 1); // including RegClass bit

    #[inline(always)]
    pub fn new(hw_enc: usize, class: RegClass) -> Self {
        debug_assert!(hw_enc <= Self::MAX);
        PReg {
            hw_enc: hw_enc as u8,
            class,
        }
    }

    /// The hardware encoding within this register's class.
    #[inline(always)]
    pub fn hw_enc(self) -> usize {
        self.hw_enc as usize
    }

    #[inline(always)]
    pub fn class(self) -> RegClass {
        self.class
    }

    /// Index into the flat space of all physical registers across
    /// classes.
    #[inline(always)]
    pub fn index(self) -> usize {
        ((self.class as u8 as usize) << Self::MAX_BITS) | (self.hw_enc as usize)
    }

    #[inline(always)]
    pub fn from_index(index: usize) -> Self {
        debug_assert!(index < Self::NUM_INDEX);
        let class = if index >> Self::MAX_BITS == 0 {
            RegClass::Int
        } else {
            RegClass::Float
        };
        PReg::new(index & Self::MAX, class)
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        PReg::new(Self::MAX, RegClass::Int)
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }
}

impl std::fmt::Debug for PReg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "PReg(hw = {}, class = {:?}, index = {})",
            self.hw_enc(),
            self.class(),
            self.index()
        )
    }
}

impl std::fmt::Display for PReg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let class = match self.class() {
            RegClass::Int => "i",
            RegClass::Float => "f",
        };
        write!(f, "p{}{}", self.hw_enc(), class)
    }
}

/// A virtual register: a dense index plus a class, packed into 32 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct VReg {
    bits: u32,
}

impl VReg {
    pub const MAX_BITS: usize = 21;
    pub const MAX: usize = (1 << Self::MAX_BITS) - 1;

    #[inline(always)]
    pub fn new(virt_reg: usize, class: RegClass) -> Self {
        debug_assert!(virt_reg <= Self::MAX);
        VReg {
            bits: ((virt_reg as u32) << 1) | (class as u8 as u32),
        }
    }

    #[inline(always)]
    pub fn vreg(self) -> usize {
        (self.bits >> 1) as usize
    }

    #[inline(always)]
    pub fn class(self) -> RegClass {
        if self.bits & 1 == 0 {
            RegClass::Int
        } else {
            RegClass::Float
        }
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        VReg::new(Self::MAX, RegClass::Int)
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }
}

impl std::fmt::Debug for VReg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "VReg(vreg = {}, class = {:?})", self.vreg(), self.class())
    }
}

impl std::fmt::Display for VReg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "v{}", self.vreg())
    }
}

/// A spill slot in the stack frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct SpillSlot {
    index: u32,
}

impl SpillSlot {
    #[inline(always)]
    pub fn new(index: usize) -> Self {
        SpillSlot {
            index: index as u32,
        }
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        SpillSlot { index: u32::MAX }
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }
}

impl std::fmt::Display for SpillSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "stack{}", self.index())
    }
}

/// The final location of a value: a physical register or a spill slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub enum Allocation {
    None,
    Reg(PReg),
    Stack(SpillSlot),
}

impl Allocation {
    #[inline(always)]
    pub fn as_reg(self) -> Option<PReg> {
        match self {
            Allocation::Reg(preg) => Some(preg),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_stack(self) -> Option<SpillSlot> {
        match self {
            Allocation::Stack(slot) => Some(slot),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn is_some(self) -> bool {
        !matches!(self, Allocation::None)
    }
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Allocation::None => write!(f, "none"),
            Allocation::Reg(preg) => write!(f, "{}", preg),
            Allocation::Stack(slot) => write!(f, "{}", slot),
        }
    }
}

/// A machine environment: the registers available for allocation and
/// their relative costs.
///
/// Registers are tried in order within each class: first the preferred
/// group, then the non-preferred group. In typical usage the preferred
/// group holds caller-save registers and the non-preferred group holds
/// callee-save registers, so that clobber-saves are minimized, but any
/// split works.
#[derive(Clone, Debug, Default)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct MachineEnv {
    pub preferred_regs_by_class: [Vec<PReg>; NUM_REG_CLASSES],
    pub non_preferred_regs_by_class: [Vec<PReg>; NUM_REG_CLASSES],
    /// Extra cost charged the first time a register is allocated in a
    /// function, indexed by `PReg::index()`. Models the save/restore
    /// cost of callee-saved registers. Empty means all-zero.
    pub cost_per_use: Vec<u8>,
}

impl MachineEnv {
    pub fn cost_per_use(&self, preg: PReg) -> u8 {
        self.cost_per_use.get(preg.index()).copied().unwrap_or(0)
    }

    pub fn num_allocatable_regs(&self, class: RegClass) -> usize {
        self.preferred_regs_by_class[class as usize].len()
            + self.non_preferred_regs_by_class[class as usize].len()
    }
}

/// One edit to apply to the function after allocation, in program
/// order. A reload is a move from a stack slot to a register just
/// before the program point; a store is a move from a register to a
/// stack slot just after it; a split copy is a register-to-register
/// move at a live range boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub enum Edit {
    Move {
        pos: SlotIndex,
        from: Allocation,
        to: Allocation,
    },
}

/// How the allocation run went.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub num_intervals: usize,
    pub queue_pops: usize,
    pub assigned_direct: usize,
    pub evictions: usize,
    pub broken_hints: usize,
    pub region_splits: usize,
    pub block_splits: usize,
    pub instruction_splits: usize,
    pub local_splits: usize,
    pub new_intervals: usize,
    pub spilled_intervals: usize,
    pub edits: usize,
}

/// The results of register allocation.
#[derive(Clone, Debug, Default)]
pub struct Output {
    /// Final location per virtual register, indexed by `VReg::vreg()`.
    /// Covers registers created by splitting and spilling as well;
    /// dead registers map to `Allocation::None`.
    pub allocs: Vec<Allocation>,
    /// Copy/reload/store points, sorted by program point.
    pub edits: Vec<Edit>,
    /// How many distinct spill slots were used.
    pub num_spillslots: usize,
    pub stats: Stats,
}

/// An error from register allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegAllocError {
    /// A register is live across a point where every physical register
    /// in its class is unavailable, and its interval can be neither
    /// split further nor spilled. The program is over-constrained at
    /// the given point.
    CannotAllocate(VReg, SlotIndex),
    /// A virtual register is used before any definition reaches the
    /// use.
    UseBeforeDef(VReg, Inst),
    /// The function's CFG is malformed at the given block (no
    /// instructions, or inconsistent successor/predecessor lists).
    BB(Block),
}

impl std::fmt::Display for RegAllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RegAllocError {}

/// Tunables for an allocation run.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    /// Re-verify interval invariants after every mutation batch.
    /// Expensive; meant for debugging the allocator itself.
    pub validate: bool,
}

/// Run the allocator on `func`. The function is mutated: splitting and
/// spilling create new virtual registers and rewrite operands to use
/// them.
pub fn run(
    func: &mut func::MachineFunction,
    env: &MachineEnv,
    options: &Options,
) -> Result<Output, RegAllocError> {
    greedy::run(func, env, options)
}
