//! The low-level intermediate representation.
//!
//! LIR instructions name only registers (virtual and physical) and make
//! loads, stores and stack adjustments explicit. Every instruction knows
//! the registers it reads and the register it writes, which is all the
//! liveness analysis and the allocators ever look at.

mod lower;

use crate::cfg::BlockId;
use crate::hir::{ArithOp, CondOp};
use crate::regs::RegId;
use std::fmt;

/// Stride used when renumbering LIR ids, leaving four free slots between
/// consecutive instructions for spill code.
pub const LIR_ID_GAP: i32 = 5;

/// Memoised result of lowering one HIR instruction: the register holding
/// its value, if it produces one.
#[derive(Copy, Clone, Debug)]
pub struct Lowered {
    pub result: Option<RegId>,
}

/// One LIR instruction.
#[derive(Clone, Debug)]
pub struct Lir {
    pub id: i32,
    pub kind: LirKind,
}

#[derive(Clone, Debug)]
pub enum LirKind {
    IntConst { dst: RegId, value: i32 },
    Arithmetic { op: ArithOp, dst: RegId, lhs: RegId, rhs: RegId },
    Copy { dst: RegId, src: RegId },
    /// `dst = mem[base]`
    Load { dst: RegId, base: RegId },
    /// `mem[base] = src`
    Store { src: RegId, base: RegId },
    /// `mem[sp++] = src`
    Push { src: RegId, sp: RegId },
    /// `reg += value`
    Inc { reg: RegId, value: i32 },
    Jump { target: BlockId },
    CondJump {
        op: CondOp,
        lhs: RegId,
        rhs: RegId,
        on_true: BlockId,
        on_false: BlockId,
    },
    Call {
        name: String,
        /// Argument registers, for liveness; the values travel on the stack.
        args: Vec<RegId>,
        returns_value: bool,
    },
    Return { value: Option<RegId> },
    /// `dst = ` one integer from standard input.
    Read { dst: RegId },
    /// Write `src` to standard output.
    Write { src: RegId },
}

impl Lir {
    /// Registers this instruction reads, in operand order.
    pub fn reads(&self) -> Vec<RegId> {
        match &self.kind {
            LirKind::IntConst { .. } | LirKind::Jump { .. } | LirKind::Read { .. } => vec![],
            LirKind::Arithmetic { lhs, rhs, .. } => vec![*lhs, *rhs],
            LirKind::Copy { src, .. } => vec![*src],
            LirKind::Load { base, .. } => vec![*base],
            LirKind::Store { src, base } => vec![*src, *base],
            LirKind::Push { src, sp } => vec![*src, *sp],
            LirKind::Inc { reg, .. } => vec![*reg],
            LirKind::CondJump { lhs, rhs, .. } => vec![*lhs, *rhs],
            LirKind::Call { args, .. } => args.clone(),
            LirKind::Return { value } => value.iter().copied().collect(),
            LirKind::Write { src } => vec![*src],
        }
    }

    /// The register this instruction writes, if any.
    pub fn write(&self) -> Option<RegId> {
        match &self.kind {
            LirKind::IntConst { dst, .. }
            | LirKind::Arithmetic { dst, .. }
            | LirKind::Copy { dst, .. }
            | LirKind::Load { dst, .. }
            | LirKind::Read { dst } => Some(*dst),
            LirKind::Inc { reg, .. } => Some(*reg),
            LirKind::Call { returns_value, .. } => {
                if *returns_value {
                    Some(RegId(crate::regs::RV as u32))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match &self.kind {
            LirKind::IntConst { .. } => "setn",
            LirKind::Arithmetic { op, .. } => op.mnemonic(),
            LirKind::Copy { .. } => "copy",
            LirKind::Load { .. } => "load",
            LirKind::Store { .. } => "store",
            LirKind::Push { .. } => "push",
            LirKind::Inc { .. } => "addn",
            LirKind::Jump { .. } => "jump",
            LirKind::CondJump { op, .. } => op.mnemonic(),
            LirKind::Call { .. } => "call",
            LirKind::Return { .. } => "return",
            LirKind::Read { .. } => "read",
            LirKind::Write { .. } => "write",
        }
    }

    /// Block-terminating jumps (φ-copies must be inserted above these).
    pub fn is_jump(&self) -> bool {
        matches!(self.kind, LirKind::Jump { .. } | LirKind::CondJump { .. })
    }

    /// Rewrites read operands equal to `from` into `to`.
    pub fn replace_read(&mut self, from: RegId, to: RegId) {
        let patch = |r: &mut RegId| {
            if *r == from {
                *r = to;
            }
        };
        match &mut self.kind {
            LirKind::Arithmetic { lhs, rhs, .. } => {
                patch(lhs);
                patch(rhs);
            }
            LirKind::Copy { src, .. } => patch(src),
            LirKind::Load { base, .. } => patch(base),
            LirKind::Store { src, base } => {
                patch(src);
                patch(base);
            }
            LirKind::Push { src, sp } => {
                patch(src);
                patch(sp);
            }
            LirKind::Inc { reg, .. } => patch(reg),
            LirKind::CondJump { lhs, rhs, .. } => {
                patch(lhs);
                patch(rhs);
            }
            LirKind::Call { args, .. } => args.iter_mut().for_each(patch),
            LirKind::Return { value: Some(v) } => patch(v),
            LirKind::Write { src } => patch(src),
            _ => {}
        }
    }

    /// Rewrites the written register, if it equals `from`, into `to`.
    pub fn replace_write(&mut self, from: RegId, to: RegId) {
        match &mut self.kind {
            LirKind::IntConst { dst, .. }
            | LirKind::Arithmetic { dst, .. }
            | LirKind::Copy { dst, .. }
            | LirKind::Load { dst, .. }
            | LirKind::Read { dst } => {
                if *dst == from {
                    *dst = to;
                }
            }
            LirKind::Inc { reg, .. } => {
                if *reg == from {
                    *reg = to;
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Lir {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            LirKind::IntConst { dst, value } => {
                write!(f, "{}: {} {} {}", self.id, self.mnemonic(), dst, value)
            }
            LirKind::Arithmetic { dst, lhs, rhs, .. } => {
                write!(f, "{}: {} {} {} {}", self.id, self.mnemonic(), dst, lhs, rhs)
            }
            LirKind::Copy { dst, src } => {
                write!(f, "{}: copy {} {}", self.id, dst, src)
            }
            LirKind::Load { dst, base } => write!(f, "{}: load {} {}", self.id, dst, base),
            LirKind::Store { src, base } => write!(f, "{}: store {} {}", self.id, src, base),
            LirKind::Push { src, sp } => write!(f, "{}: push {} {}", self.id, src, sp),
            LirKind::Inc { reg, value } => write!(f, "{}: addn {} {}", self.id, reg, value),
            LirKind::Jump { target } => write!(f, "{}: jump {}", self.id, target),
            LirKind::CondJump {
                lhs,
                rhs,
                on_true,
                on_false,
                ..
            } => write!(
                f,
                "{}: {} {} {} {} {}",
                self.id,
                self.mnemonic(),
                lhs,
                rhs,
                on_true,
                on_false
            ),
            LirKind::Call {
                name,
                args,
                returns_value,
            } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                if *returns_value {
                    write!(
                        f,
                        "{}: call {} {}({})",
                        self.id,
                        RegId(crate::regs::RV as u32),
                        name,
                        rendered.join(", ")
                    )
                } else {
                    write!(f, "{}: call {}({})", self.id, name, rendered.join(", "))
                }
            }
            LirKind::Return { value: Some(v) } => write!(f, "{}: return {}", self.id, v),
            LirKind::Return { value: None } => write!(f, "{}: return", self.id),
            LirKind::Read { dst } => write!(f, "{}: read {}", self.id, dst),
            LirKind::Write { src } => write!(f, "{}: write {}", self.id, src),
        }
    }
}
