//! Liveness analysis: per-block use/def sets, the global in/out fixpoint,
//! and per-register liveness intervals over LIR positions.

mod interval;

pub use interval::{Interval, Range, UseKind};

use crate::cfg::Cfg;
use crate::lir::LIR_ID_GAP;
use crate::regs::{RegId, RegSet};
use std::io;

impl Cfg {
    /// Runs the whole analysis: local sets, global fixpoint, intervals.
    pub fn compute_liveness(&mut self) {
        self.compute_local_liveness_sets();
        self.compute_global_liveness_sets();
        self.compute_liveness_intervals();
    }

    /// `liveUse` = registers read before any write in the block;
    /// `liveDef` = registers written in the block.
    pub fn compute_local_liveness_sets(&mut self) {
        let capacity = self.registers.len();
        for block in &mut self.blocks {
            block.live_use = RegSet::with_capacity(capacity);
            block.live_def = RegSet::with_capacity(capacity);
            for lir in &block.lir {
                for read in lir.reads() {
                    if !block.live_def.contains(read) {
                        block.live_use.insert(read);
                    }
                }
                if let Some(write) = lir.write() {
                    block.live_def.insert(write);
                }
            }
        }
    }

    /// Iterates
    ///   liveOut(B) = ⋃ liveIn(S) over successors S
    ///   liveIn(B)  = liveUse(B) ∪ (liveOut(B) ∖ liveDef(B))
    /// in reverse block order until nothing changes.
    pub fn compute_global_liveness_sets(&mut self) {
        let capacity = self.registers.len();
        for block in &mut self.blocks {
            block.live_in = RegSet::with_capacity(capacity);
            block.live_out = RegSet::with_capacity(capacity);
        }
        loop {
            let mut changed = false;
            for i in (0..self.blocks.len()).rev() {
                let mut new_out = RegSet::with_capacity(capacity);
                for succ in self.blocks[i].successors.clone() {
                    new_out.union_with(&self.blocks[succ.index()].live_in);
                }
                if self.blocks[i].live_out != new_out {
                    self.blocks[i].live_out = new_out;
                    changed = true;
                }
                let block = &mut self.blocks[i];
                let mut new_in = block.live_out.clone();
                new_in.subtract_then_union(&block.live_def, &block.live_use);
                block.live_in = new_in;
            }
            if !changed {
                break;
            }
        }
    }

    /// Builds one interval per register id by walking blocks (and each
    /// block's LIR) backwards: live-out registers span the whole block,
    /// writes truncate, reads extend back to the block start.
    pub fn compute_liveness_intervals(&mut self) {
        self.intervals = (0..self.registers.len())
            .map(|i| Interval::new(RegId(i as u32)))
            .collect();

        for block in self.blocks.iter().rev() {
            let (start, end) = match (block.lir.first(), block.lir.last()) {
                (Some(first), Some(last)) => (first.id, last.id),
                _ => continue,
            };
            for reg in block.live_out.iter() {
                self.intervals[reg.0 as usize].add_range(
                    Range { start, stop: end },
                    LIR_ID_GAP,
                );
            }
            for lir in block.lir.iter().rev() {
                let position = lir.id;
                if let Some(write) = lir.write() {
                    let interval = &mut self.intervals[write.0 as usize];
                    if interval.is_empty() {
                        // A write whose value is never read still occupies
                        // its own position.
                        interval.add_range(
                            Range {
                                start: position,
                                stop: position,
                            },
                            LIR_ID_GAP,
                        );
                    } else {
                        interval.first_range_from(position);
                    }
                    interval.add_use_position(position, UseKind::Write);
                }
                for read in lir.reads() {
                    let interval = &mut self.intervals[read.0 as usize];
                    interval.add_range(
                        Range {
                            start,
                            stop: position,
                        },
                        LIR_ID_GAP,
                    );
                    interval.add_use_position(position, UseKind::Read);
                }
            }
        }
    }

    /// Dumps the per-block liveness sets.
    pub fn write_liveness_sets(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "[[ LIVENESS SETS ]]")?;
        writeln!(out)?;
        for block in &self.blocks {
            writeln!(out, "{}:", block.id)?;
            writeln!(out, "  liveUse: {}", block.live_use)?;
            writeln!(out, "  liveDef: {}", block.live_def)?;
            writeln!(out, "  liveIn:  {}", block.live_in)?;
            writeln!(out, "  liveOut: {}", block.live_out)?;
            writeln!(out)?;
        }
        Ok(())
    }

    /// Dumps the non-empty liveness intervals.
    pub fn write_liveness_intervals(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "[[ LIVENESS INTERVALS ]]")?;
        writeln!(out)?;
        for interval in &self.intervals {
            if interval.is_empty() {
                continue;
            }
            writeln!(out, "{}: {}", interval.register, interval)?;
        }
        writeln!(out)?;
        Ok(())
    }
}
