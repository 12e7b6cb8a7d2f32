//! The high-level intermediate representation.
//!
//! HIR is an SSA form built by symbolically executing the operand stack of
//! each block: every stack slot and local-variable slot holds the id of the
//! instruction that produced its value, and joins get φ-functions. HIR
//! instructions never name registers; those appear in the LIR.

mod builder;

use crate::cfg::BlockId;
use std::fmt;

/// Identifier of an HIR instruction; doubles as an index into
/// [`crate::cfg::Cfg::hir`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct HirId(pub u32);

impl HirId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Integer arithmetic operators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    /// The infix symbol used by HIR printing.
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
        }
    }

    /// The LIR/target mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "mod",
        }
    }
}

/// Signed integer comparison operators for conditional jumps.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CondOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CondOp::Eq => "==",
            CondOp::Ne => "!=",
            CondOp::Lt => "<",
            CondOp::Le => "<=",
            CondOp::Gt => ">",
            CondOp::Ge => ">=",
        }
    }

    /// The LIR mnemonic of the jump taken when the comparison holds.
    pub fn mnemonic(self) -> &'static str {
        match self {
            CondOp::Eq => "jeq",
            CondOp::Ne => "jne",
            CondOp::Lt => "jlt",
            CondOp::Le => "jle",
            CondOp::Gt => "jgt",
            CondOp::Ge => "jge",
        }
    }
}

/// One HIR instruction.
#[derive(Clone, Debug)]
pub struct HirInstruction {
    pub id: HirId,
    /// Enclosing basic block.
    pub block: BlockId,
    pub kind: HirKind,
}

#[derive(Clone, Debug)]
pub enum HirKind {
    /// The value of formal parameter `index` on entry.
    LoadParam { index: usize },

    IntConst { value: i32 },

    Arithmetic { op: ArithOp, lhs: HirId, rhs: HirId },

    /// Unconditional jump; terminates its block.
    Jump { target: BlockId },

    CondJump {
        op: CondOp,
        lhs: HirId,
        rhs: HirId,
        on_true: BlockId,
        on_false: BlockId,
    },

    Call {
        name: String,
        args: Vec<HirId>,
        /// "I" or "V".
        return_tag: &'static str,
        /// True for the runtime-provided `read`/`write` methods, which lower
        /// to dedicated IO instructions instead of a call sequence.
        is_io: bool,
    },

    Return { value: Option<HirId> },

    /// Merge of the values local slot `index` can hold at block entry, one
    /// argument per predecessor. `None` arguments stand for uninitialised
    /// slots (or, before cleanup, back edges not yet walked).
    Phi {
        index: usize,
        args: Vec<Option<HirId>>,
    },
}

impl HirInstruction {
    /// "I" for value-producing instructions, "V" for void calls, "" for
    /// control flow.
    pub fn type_tag(&self) -> &'static str {
        match &self.kind {
            HirKind::LoadParam { .. }
            | HirKind::IntConst { .. }
            | HirKind::Arithmetic { .. }
            | HirKind::Phi { .. } => "I",
            HirKind::Call { return_tag, .. } => return_tag,
            HirKind::Return { value: Some(_) } => "I",
            _ => "",
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match &self.kind {
            HirKind::LoadParam { .. } => "ldparam",
            HirKind::IntConst { .. } => "ldc",
            HirKind::Arithmetic { op, .. } => op.symbol(),
            HirKind::Jump { .. } => "goto",
            HirKind::CondJump { op, .. } => op.symbol(),
            HirKind::Call { .. } => "call",
            HirKind::Return { value: Some(_) } => "ireturn",
            HirKind::Return { value: None } => "return",
            HirKind::Phi { .. } => "phi",
        }
    }

    /// Tagged id, e.g. `I7` for a value and `7` for control flow.
    pub fn tagged_id(&self) -> String {
        format!("{}{}", self.type_tag(), self.id.0)
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, HirKind::Phi { .. })
    }
}

impl fmt::Display for HirId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
