use crate::cfg::tuple::Tuple;
use crate::hir::HirId;
use crate::lir::Lir;
use crate::regs::RegSet;
use crate::target::TargetInstruction;
use std::fmt;

/// Identifier of a basic block within one method's control-flow graph.
///
/// Block ids double as indices into [`crate::cfg::Cfg::blocks`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// One basic block: its tuples, edges, and the per-stage instruction lists
/// that accumulate as the pipeline runs.
#[derive(Debug, Default)]
pub struct BasicBlock {
    pub id: BlockId,

    /// Tuples forming the straight-line body (empty for the synthetic entry).
    pub tuples: Vec<Tuple>,

    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,

    pub is_loop_head: bool,
    pub is_loop_tail: bool,

    /// Scratch flags for graph walks (loop detection, reachability, HIR order).
    pub(crate) visited: bool,
    pub(crate) active: bool,

    /// Symbolic value of each source-level local at block entry. `None` until
    /// the HIR builder reaches the block; inner `None`s are uninitialised
    /// slots.
    pub locals: Option<Vec<Option<HirId>>>,

    /// HIR instructions, in order. φ-functions come first.
    pub hir: Vec<HirId>,

    /// LIR instructions, in order.
    pub lir: Vec<Lir>,

    /// Registers read before being written in this block.
    pub live_use: RegSet,
    /// Registers written in this block.
    pub live_def: RegSet,
    pub live_in: RegSet,
    pub live_out: RegSet,

    /// Target instructions emitted for this block.
    pub target: Vec<TargetInstruction>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> BasicBlock {
        BasicBlock {
            id,
            ..BasicBlock::default()
        }
    }

    /// `"B3 (pred: [B1, B2], succ: [B4], LH)"` — the header used by every dump.
    pub fn describe(&self) -> String {
        let preds: Vec<String> = self.predecessors.iter().map(|b| b.to_string()).collect();
        let succs: Vec<String> = self.successors.iter().map(|b| b.to_string()).collect();
        let mut s = format!(
            "{} (pred: [{}], succ: [{}]",
            self.id,
            preds.join(", "),
            succs.join(", ")
        );
        if self.is_loop_head {
            s.push_str(", LH");
        }
        if self.is_loop_tail {
            s.push_str(", LT");
        }
        s.push(')');
        s
    }
}

impl Default for BlockId {
    fn default() -> BlockId {
        BlockId(0)
    }
}
