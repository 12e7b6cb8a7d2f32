//! Target-machine instructions and their text rendering.
//!
//! The target is a 16-register word machine with numeric program counters.
//! Instructions are kept symbolic (block ids, method names) until jump
//! resolution patches in real addresses, after which each one renders as a
//! fixed-column assembly line with a trailing comment.

mod emitter;

pub use emitter::Emitter;

use crate::cfg::BlockId;
use crate::hir::{ArithOp, CondOp};
use crate::regs::PHYSICAL;
use std::fmt;
use std::io;

/// Where a branch, return or call transfers control. Symbolic until jump
/// resolution rewrites it into [`BranchDest::Address`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum BranchDest {
    /// First instruction of a basic block in the same method.
    Block(BlockId),
    /// The method's epilogue.
    MethodExit,
    /// Entry of a named method.
    Method(String),
    /// A resolved program counter.
    Address(usize),
}

/// One target instruction. The pc is assigned during layout.
#[derive(Clone, Debug)]
pub struct TargetInstruction {
    pub pc: usize,
    pub kind: TargetKind,
}

#[derive(Clone, Debug)]
pub enum TargetKind {
    /// `set0`/`set1`/`setn`: load a constant.
    SetConst { dst: u8, value: i32 },
    Arithmetic { op: ArithOp, dst: u8, lhs: u8, rhs: u8 },
    Copy { dst: u8, src: u8 },
    /// `loadn`: `dst = mem[base]`.
    Load { dst: u8, base: u8 },
    /// `storer`: `mem[base] = src`.
    Store { src: u8, base: u8 },
    /// `pushr`: `mem[sp++] = src`.
    Push { src: u8, sp: u8 },
    /// `popr`: `dst = mem[--sp]`.
    Pop { dst: u8, sp: u8 },
    /// `addn`: `reg += value`.
    Inc { reg: u8, value: i32 },
    /// `jumpr N`: unconditional jump to an address.
    Jump { dest: BranchDest },
    /// `jeqn`/`jnen`/…: jump to an address when the comparison holds.
    CondJump {
        op: CondOp,
        lhs: u8,
        rhs: u8,
        dest: BranchDest,
    },
    /// `calln`: store the return address in `ra` and jump to the callee.
    Call { ra: u8, name: String, dest: BranchDest },
    /// `jumpr rX`: jump to the address held in a register (method return).
    JumpReg { reg: u8 },
    Read { dst: u8 },
    Write { src: u8 },
}

impl TargetInstruction {
    pub fn new(kind: TargetKind) -> TargetInstruction {
        TargetInstruction { pc: 0, kind }
    }

    pub fn mnemonic(&self) -> &'static str {
        match &self.kind {
            TargetKind::SetConst { value: 0, .. } => "set0",
            TargetKind::SetConst { value: 1, .. } => "set1",
            TargetKind::SetConst { .. } => "setn",
            TargetKind::Arithmetic { op, .. } => op.mnemonic(),
            TargetKind::Copy { .. } => "copy",
            TargetKind::Load { .. } => "loadn",
            TargetKind::Store { .. } => "storer",
            TargetKind::Push { .. } => "pushr",
            TargetKind::Pop { .. } => "popr",
            TargetKind::Inc { .. } => "addn",
            TargetKind::Jump { .. } | TargetKind::JumpReg { .. } => "jumpr",
            TargetKind::CondJump { op, .. } => match op {
                CondOp::Eq => "jeqn",
                CondOp::Ne => "jnen",
                CondOp::Lt => "jltn",
                CondOp::Le => "jlen",
                CondOp::Gt => "jgtn",
                CondOp::Ge => "jgen",
            },
            TargetKind::Call { .. } => "calln",
            TargetKind::Read { .. } => "read",
            TargetKind::Write { .. } => "write",
        }
    }

    /// The destination this instruction still needs resolved, if any.
    pub fn dest_mut(&mut self) -> Option<&mut BranchDest> {
        match &mut self.kind {
            TargetKind::Jump { dest }
            | TargetKind::CondJump { dest, .. }
            | TargetKind::Call { dest, .. } => Some(dest),
            _ => None,
        }
    }

    /// Writes one fixed-column assembly line: pc, mnemonic, up to three
    /// operands, and a human-readable comment.
    pub fn write(&self, out: &mut impl io::Write) -> io::Result<()> {
        let mnemonic = self.mnemonic();
        let (a, b, c, comment) = self.render_operands();
        writeln!(
            out,
            "{:<6}{:<8}{:<8}{:<8}{:<8}# {}",
            self.pc, mnemonic, a, b, c, comment
        )
    }

    fn render_operands(&self) -> (String, String, String, String) {
        let reg = |n: &u8| PHYSICAL[*n as usize].name.to_owned();
        let none = String::new;
        match &self.kind {
            TargetKind::SetConst { dst, value } => (
                reg(dst),
                value.to_string(),
                none(),
                format!("{} = {}", reg(dst), value),
            ),
            TargetKind::Arithmetic { op, dst, lhs, rhs } => (
                reg(dst),
                reg(lhs),
                reg(rhs),
                format!("{} = {} {} {}", reg(dst), reg(lhs), op.symbol(), reg(rhs)),
            ),
            TargetKind::Copy { dst, src } => {
                (reg(dst), reg(src), none(), format!("{} = {}", reg(dst), reg(src)))
            }
            TargetKind::Load { dst, base } => (
                reg(dst),
                reg(base),
                none(),
                format!("{} = mem[{}]", reg(dst), reg(base)),
            ),
            TargetKind::Store { src, base } => (
                reg(src),
                reg(base),
                none(),
                format!("mem[{}] = {}", reg(base), reg(src)),
            ),
            TargetKind::Push { src, sp } => (
                reg(src),
                reg(sp),
                none(),
                format!("mem[{}++] = {}", reg(sp), reg(src)),
            ),
            TargetKind::Pop { dst, sp } => (
                reg(dst),
                reg(sp),
                none(),
                format!("{} = mem[--{}]", reg(dst), reg(sp)),
            ),
            TargetKind::Inc { reg: r, value } => (
                reg(r),
                value.to_string(),
                none(),
                format!("{} += {}", reg(r), value),
            ),
            TargetKind::Jump { dest } => {
                let address = dest_address(dest);
                (address.clone(), none(), none(), format!("jump to {}", address))
            }
            TargetKind::CondJump { op, lhs, rhs, dest } => {
                let address = dest_address(dest);
                (
                    reg(lhs),
                    reg(rhs),
                    address.clone(),
                    format!("if {} {} {} jump to {}", reg(lhs), op.symbol(), reg(rhs), address),
                )
            }
            TargetKind::Call { ra, name, dest } => {
                let address = dest_address(dest);
                (
                    reg(ra),
                    address.clone(),
                    none(),
                    format!("call {} @ {}", name, address),
                )
            }
            TargetKind::JumpReg { reg: r } => {
                (reg(r), none(), none(), format!("jump to {}", reg(r)))
            }
            TargetKind::Read { dst } => (reg(dst), none(), none(), format!("{} = read()", reg(dst))),
            TargetKind::Write { src } => (reg(src), none(), none(), format!("write({})", reg(src))),
        }
    }
}

fn dest_address(dest: &BranchDest) -> String {
    match dest {
        BranchDest::Address(pc) => pc.to_string(),
        // Unresolved destinations only show up in debug output; resolution
        // runs before anything is written.
        BranchDest::Block(block) => format!("{}", block),
        BranchDest::MethodExit => "exit".to_owned(),
        BranchDest::Method(name) => name.clone(),
    }
}

impl fmt::Display for TargetInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (a, b, c, comment) = self.render_operands();
        write!(
            f,
            "{:<6}{:<8}{:<8}{:<8}{:<8}# {}",
            self.pc,
            self.mnemonic(),
            a,
            b,
            c,
            comment
        )
    }
}
