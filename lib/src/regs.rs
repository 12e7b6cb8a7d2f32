//! The register model shared by every stage past HIR construction.
//!
//! Register identifiers form one flat space: ids `0..16` are the physical
//! registers of the target machine, ids `16..` are virtual registers minted
//! during lowering. Everything downstream (liveness, interference, spilling)
//! indexes bit sets and interval tables by these ids.

use std::fmt;

/// Identifier of a register, physical (`0..16`) or virtual (`16..`).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RegId(pub u32);

impl RegId {
    pub fn is_physical(self) -> bool {
        (self.0 as usize) < NUM_PHYSICAL
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_physical() {
            write!(f, "{}", PHYSICAL[self.0 as usize].name)
        } else {
            write!(f, "v{}", self.0)
        }
    }
}

/// Number of physical registers on the target machine.
pub const NUM_PHYSICAL: usize = 16;

/// Constant-zero register; doubles as the data scratch for spilled values.
pub const ZERO: u8 = 0;
/// Address scratch used by spill reloads and parameter loads.
pub const SCRATCH: u8 = 11;
/// Frame pointer. Set up by the prologue, preserved across calls.
pub const FP: u8 = 12;
/// Return value register.
pub const RV: u8 = 13;
/// Return address register, written by `calln`.
pub const RA: u8 = 14;
/// Stack pointer. Pushes move it up, pops move it down.
pub const SP: u8 = 15;

/// One more than the highest physical register the allocator may consider.
pub const MAX_COUNT: u8 = 13;

/// A physical register of the target machine.
#[derive(Debug)]
pub struct PhysicalRegister {
    pub number: u8,
    pub name: &'static str,
}

/// The fixed physical register table, indexed by register number.
pub static PHYSICAL: [PhysicalRegister; NUM_PHYSICAL] = [
    PhysicalRegister { number: 0, name: "r0" },
    PhysicalRegister { number: 1, name: "r1" },
    PhysicalRegister { number: 2, name: "r2" },
    PhysicalRegister { number: 3, name: "r3" },
    PhysicalRegister { number: 4, name: "r4" },
    PhysicalRegister { number: 5, name: "r5" },
    PhysicalRegister { number: 6, name: "r6" },
    PhysicalRegister { number: 7, name: "r7" },
    PhysicalRegister { number: 8, name: "r8" },
    PhysicalRegister { number: 9, name: "r9" },
    PhysicalRegister { number: 10, name: "r10" },
    PhysicalRegister { number: 11, name: "r11" },
    PhysicalRegister { number: 12, name: "r12" },
    PhysicalRegister { number: 13, name: "r13" },
    PhysicalRegister { number: 14, name: "r14" },
    PhysicalRegister { number: 15, name: "r15" },
];

/// Registers the allocators may hand out: everything below [`MAX_COUNT`]
/// except the reserved roles.
///
/// `r0` is the constant zero, `r11` the spill scratch, `r12` the frame
/// pointer, and `r13..r15` hold RV/RA/SP, so the pool comes out to
/// `r1..r10`. All ten are callee-saved; the prologue pushes the ones a
/// method actually uses.
pub fn allocatable() -> impl Iterator<Item = u8> {
    (1..MAX_COUNT).filter(|r| *r != SCRATCH && *r != FP)
}

/// A register as tracked by one method's compilation.
#[derive(Debug)]
pub enum Register {
    Physical(u8),
    Virtual(VirtualRegister),
}

impl Register {
    pub fn new_virtual(number: u32) -> Register {
        Register::Virtual(VirtualRegister {
            number,
            preg: None,
            spill: false,
            offset: None,
        })
    }

    /// The physical register this register ends up in, once allocation has
    /// run. For a spilled virtual register this is the spill data scratch.
    pub fn physical(&self) -> Option<u8> {
        match self {
            Register::Physical(n) => Some(*n),
            Register::Virtual(v) => v.preg,
        }
    }

    pub fn as_virtual(&self) -> Option<&VirtualRegister> {
        match self {
            Register::Virtual(v) => Some(v),
            Register::Physical(_) => None,
        }
    }

    pub fn as_virtual_mut(&mut self) -> Option<&mut VirtualRegister> {
        match self {
            Register::Virtual(v) => Some(v),
            Register::Physical(_) => None,
        }
    }
}

/// A virtual register together with its allocation result.
#[derive(Debug)]
pub struct VirtualRegister {
    pub number: u32,
    /// Physical register assigned by the allocator.
    pub preg: Option<u8>,
    /// Whether the register lives in memory between uses.
    pub spill: bool,
    /// Memory offset relative to SP, present iff `spill`.
    pub offset: Option<i32>,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Register::Physical(n) => write!(f, "{}", PHYSICAL[*n as usize].name),
            Register::Virtual(v) => write!(f, "v{}", v.number),
        }
    }
}

/// A growable bit set indexed by register id.
///
/// Used for the per-block `liveUse`/`liveDef`/`liveIn`/`liveOut` sets.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct RegSet {
    words: Vec<u64>,
}

impl RegSet {
    pub fn with_capacity(regs: usize) -> RegSet {
        RegSet {
            words: vec![0; (regs + 63) / 64],
        }
    }

    pub fn insert(&mut self, reg: RegId) {
        let idx = reg.0 as usize;
        if idx / 64 >= self.words.len() {
            self.words.resize(idx / 64 + 1, 0);
        }
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    pub fn contains(&self, reg: RegId) -> bool {
        let idx = reg.0 as usize;
        idx / 64 < self.words.len() && self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    /// `self |= other`.
    pub fn union_with(&mut self, other: &RegSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    /// `self = (self - remove) | add`, the dataflow transfer step.
    pub fn subtract_then_union(&mut self, remove: &RegSet, add: &RegSet) {
        let len = self.words.len().max(add.words.len());
        self.words.resize(len, 0);
        for i in 0..len {
            let r = remove.words.get(i).copied().unwrap_or(0);
            let a = add.words.get(i).copied().unwrap_or(0);
            self.words[i] = (self.words[i] & !r) | a;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = RegId> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..64)
                .filter(move |bit| w & (1 << bit) != 0)
                .map(move |bit| RegId((wi * 64 + bit) as u32))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

impl fmt::Debug for RegSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for RegSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, reg) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", reg)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_table_is_consistent() {
        for (i, reg) in PHYSICAL.iter().enumerate() {
            assert_eq!(reg.number as usize, i);
        }
        assert_eq!(PHYSICAL[RV as usize].name, "r13");
        assert_eq!(PHYSICAL[SP as usize].name, "r15");
    }

    #[test]
    fn allocatable_pool_skips_reserved_roles() {
        let pool: Vec<u8> = allocatable().collect();
        assert_eq!(pool, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert!(!pool.contains(&ZERO));
        assert!(!pool.contains(&SCRATCH));
        assert!(!pool.contains(&FP));
    }

    #[test]
    fn regset_transfer() {
        let mut live_in = RegSet::with_capacity(64);
        let mut live_out = RegSet::with_capacity(64);
        let mut def = RegSet::with_capacity(64);
        let mut usage = RegSet::with_capacity(64);

        live_out.insert(RegId(16));
        live_out.insert(RegId(17));
        def.insert(RegId(17));
        usage.insert(RegId(20));

        live_in.union_with(&live_out);
        live_in.subtract_then_union(&def, &usage);

        assert!(live_in.contains(RegId(16)));
        assert!(!live_in.contains(RegId(17)));
        assert!(live_in.contains(RegId(20)));
    }

    #[test]
    fn regset_grows_on_insert() {
        let mut set = RegSet::with_capacity(1);
        set.insert(RegId(200));
        assert!(set.contains(RegId(200)));
        assert!(!set.contains(RegId(199)));
    }
}
