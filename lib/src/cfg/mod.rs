//! Control-flow graph construction.
//!
//! Tuples are split into basic blocks at leaders (the first tuple, every
//! branch target, every tuple following a branch), blocks are linked by
//! fall-through and branch edges, loops are detected with a depth-first
//! walk, and unreachable blocks are dropped. The resulting [`Cfg`] then
//! carries the method through the rest of the pipeline.

mod block;
mod tuple;

pub use block::{BasicBlock, BlockId};
pub use tuple::{decode_tuples, Opcode, Operand, Tuple};

use crate::classfile::{ConstantPool, Descriptor, MethodDescriptor};
use crate::errors::Error;
use crate::hir::HirInstruction;
use crate::lir::Lowered;
use crate::liveness::Interval;
use crate::regs::{RegId, Register, NUM_PHYSICAL};
use std::collections::HashMap;
use std::io;

/// Per-method compilation state: the block list plus the arenas that the
/// HIR, LIR, liveness and allocation stages fill in.
///
/// Block, HIR and register "references" are all small integer ids resolved
/// through this struct, which keeps the heavily cyclic block/instruction
/// graph representable without reference counting.
#[derive(Debug)]
pub struct Cfg {
    pub name: String,
    pub raw_descriptor: String,
    pub descriptor: MethodDescriptor,

    /// Declared number of local-variable slots.
    pub num_locals: usize,

    /// Blocks in layout order. `blocks[i].id == i`; B0 is the synthetic
    /// entry, B1 the first real block.
    pub blocks: Vec<BasicBlock>,

    /// Maps a leader tuple's pc to its block.
    pub(crate) pc_to_block: HashMap<u32, BlockId>,

    /// HIR arena; `hir[i].id == i`.
    pub hir: Vec<HirInstruction>,

    /// Value-numbering redirection: initially the identity, rewritten when a
    /// redundant φ is folded into its representative argument.
    pub(crate) hir_map: Vec<u32>,

    /// Register arena indexed by register id. Slots `0..16` hold physical
    /// registers once they are first used; later slots are virtual.
    pub registers: Vec<Option<Register>>,

    /// Liveness intervals, parallel to `registers`.
    pub intervals: Vec<Interval>,

    /// Memoised lowering results, parallel to `hir`.
    pub(crate) lowered: Vec<Option<Lowered>>,

    /// Next LIR instruction id.
    pub(crate) next_lir_id: i32,
}

impl Cfg {
    /// Builds the CFG for one method: decodes tuples, forms blocks, links
    /// edges, detects loops and prunes unreachable blocks.
    pub fn build(
        name: &str,
        raw_descriptor: &str,
        max_locals: u16,
        code: &[u8],
        pool: &ConstantPool,
    ) -> Result<Cfg, Error> {
        let descriptor = MethodDescriptor::parse(raw_descriptor)
            .map_err(|e| Error::malformed(name, e.to_string()))?;

        let mut tuples = decode_tuples(name, code, pool)?;
        if tuples.is_empty() {
            return Err(Error::malformed(name, "method has no code"));
        }

        mark_leaders(name, &mut tuples)?;

        let mut cfg = Cfg {
            name: name.to_owned(),
            raw_descriptor: raw_descriptor.to_owned(),
            descriptor,
            num_locals: max_locals as usize,
            blocks: Vec::new(),
            pc_to_block: HashMap::new(),
            hir: Vec::new(),
            hir_map: Vec::new(),
            registers: Vec::new(),
            intervals: Vec::new(),
            lowered: Vec::new(),
            next_lir_id: 0,
        };

        cfg.build_blocks(tuples);
        cfg.build_edges()?;
        cfg.detect_loops();
        cfg.remove_unreachable_blocks();
        Ok(cfg)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// The block whose leader tuple sits at `pc`.
    pub fn block_at_pc(&self, pc: u32) -> Option<BlockId> {
        self.pc_to_block.get(&pc).copied()
    }

    /// Mints a fresh virtual register and returns its id.
    pub(crate) fn new_vreg(&mut self) -> RegId {
        let id = self.registers.len() as u32;
        self.registers.push(Some(Register::new_virtual(id)));
        RegId(id)
    }

    /// Records that physical register `number` is used by this method and
    /// returns its id.
    pub(crate) fn use_physical(&mut self, number: u8) -> RegId {
        let slot = &mut self.registers[number as usize];
        if slot.is_none() {
            *slot = Some(Register::Physical(number));
        }
        RegId(number as u32)
    }

    /// Physical registers this method actually touches.
    pub fn physical_registers_used(&self) -> Vec<u8> {
        let mut used: Vec<u8> = self.registers[..NUM_PHYSICAL]
            .iter()
            .flatten()
            .filter_map(|r| r.physical())
            .collect();
        for reg in self.registers[NUM_PHYSICAL..].iter().flatten() {
            if let Some(p) = reg.physical() {
                used.push(p);
            }
        }
        used.sort_unstable();
        used.dedup();
        used
    }

    // Splits the decoded tuples at leaders, prepending the synthetic entry
    // block.
    fn build_blocks(&mut self, tuples: Vec<Tuple>) {
        self.blocks.push(BasicBlock::new(BlockId(0)));
        let mut current = BasicBlock::new(BlockId(1));
        for tuple in tuples {
            if tuple.is_leader && !current.tuples.is_empty() {
                let finished = std::mem::replace(
                    &mut current,
                    BasicBlock::new(BlockId(self.blocks.len() as u32 + 1)),
                );
                self.blocks.push(finished);
            }
            if tuple.is_leader {
                self.pc_to_block.insert(tuple.pc, current.id);
            }
            current.tuples.push(tuple);
        }
        self.blocks.push(current);
    }

    // Computes successor edges from each block's final tuple and records
    // predecessors as the reverse relation.
    fn build_edges(&mut self) -> Result<(), Error> {
        let mut edges: Vec<(BlockId, BlockId)> = vec![(BlockId(0), BlockId(1))];
        for i in 1..self.blocks.len() {
            let block = &self.blocks[i];
            let from = block.id;
            let last = match block.tuples.last() {
                Some(t) => t,
                None => continue,
            };
            if last.opcode.is_branch() {
                let target_pc = last.branch_target().unwrap();
                let target = self.block_at_pc(target_pc).ok_or_else(|| {
                    Error::unreachable(
                        &self.name,
                        format!(
                            "branch at pc {} targets pc {} which is not an instruction boundary",
                            last.pc, target_pc
                        ),
                    )
                })?;
                if last.opcode != Opcode::Goto && i + 1 < self.blocks.len() {
                    edges.push((from, BlockId(i as u32 + 1)));
                }
                edges.push((from, target));
            } else if !last.opcode.is_return() && i + 1 < self.blocks.len() {
                edges.push((from, BlockId(i as u32 + 1)));
            }
        }
        for (from, to) in edges {
            self.blocks[from.index()].successors.push(to);
            self.blocks[to.index()].predecessors.push(from);
        }
        Ok(())
    }

    /// Marks loop heads and tails with a depth-first walk from B0. A back
    /// edge into a block still on the walk stack makes that block a loop
    /// head and the edge's source a loop tail.
    fn detect_loops(&mut self) {
        for block in &mut self.blocks {
            block.visited = false;
            block.active = false;
        }
        self.blocks[0].visited = true;
        self.blocks[0].active = true;
        let mut stack: Vec<(BlockId, usize)> = vec![(BlockId(0), 0)];
        while let Some((block, next)) = stack.last().copied() {
            if next < self.blocks[block.index()].successors.len() {
                stack.last_mut().unwrap().1 += 1;
                let succ = self.blocks[block.index()].successors[next];
                if !self.blocks[succ.index()].visited {
                    self.blocks[succ.index()].visited = true;
                    self.blocks[succ.index()].active = true;
                    stack.push((succ, 0));
                } else if self.blocks[succ.index()].active {
                    self.blocks[succ.index()].is_loop_head = true;
                    self.blocks[block.index()].is_loop_tail = true;
                }
            } else {
                self.blocks[block.index()].active = false;
                stack.pop();
            }
        }
    }

    /// Drops every block the loop-detection walk never reached and renumbers
    /// the remainder so block ids stay dense.
    fn remove_unreachable_blocks(&mut self) {
        if self.blocks.iter().all(|b| b.visited) {
            return;
        }

        let mut remap: Vec<Option<BlockId>> = Vec::with_capacity(self.blocks.len());
        let mut next = 0u32;
        for block in &self.blocks {
            if block.visited {
                remap.push(Some(BlockId(next)));
                next += 1;
            } else {
                remap.push(None);
            }
        }

        let old_blocks = std::mem::take(&mut self.blocks);
        for mut block in old_blocks {
            let new_id = match remap[block.id.index()] {
                Some(id) => id,
                None => continue,
            };
            block.id = new_id;
            block.successors = block
                .successors
                .iter()
                .filter_map(|s| remap[s.index()])
                .collect();
            block.predecessors = block
                .predecessors
                .iter()
                .filter_map(|p| remap[p.index()])
                .collect();
            self.blocks.push(block);
        }

        let old_map = std::mem::take(&mut self.pc_to_block);
        self.pc_to_block = old_map
            .into_iter()
            .filter_map(|(pc, b)| remap[b.index()].map(|id| (pc, id)))
            .collect();
    }

    /// Dumps the tuple form of every block.
    pub fn write_tuples(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "[[ TUPLES ]]")?;
        writeln!(out)?;
        for block in &self.blocks {
            writeln!(out, "{}:", block.describe())?;
            for tuple in &block.tuples {
                writeln!(out, "  {}", tuple)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

// The first tuple, every branch target, and every tuple following a branch
// lead a block.
fn mark_leaders(method: &str, tuples: &mut [Tuple]) -> Result<(), Error> {
    let pc_index: HashMap<u32, usize> = tuples
        .iter()
        .enumerate()
        .map(|(i, t)| (t.pc, i))
        .collect();

    tuples[0].is_leader = true;
    let mut extra_leaders = Vec::new();
    for (i, tuple) in tuples.iter().enumerate() {
        if let Some(target) = tuple.branch_target() {
            let target_index = *pc_index.get(&target).ok_or_else(|| {
                Error::unreachable(
                    method,
                    format!(
                        "branch at pc {} targets pc {} which is not an instruction boundary",
                        tuple.pc, target
                    ),
                )
            })?;
            extra_leaders.push(target_index);
            if i + 1 < tuples.len() {
                extra_leaders.push(i + 1);
            }
        }
    }
    for index in extra_leaders {
        tuples[index].is_leader = true;
    }
    Ok(())
}
