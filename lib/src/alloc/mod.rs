//! Register allocation: assigning physical registers to virtual ones and
//! rewriting spilled values through memory.

mod graph;
mod naive;

use crate::cfg::Cfg;
use crate::errors::Error;
use crate::lir::{Lir, LirKind};
use crate::regs::{RegId, SCRATCH, SP, ZERO};
use std::fmt;
use std::str::FromStr;

/// Spill slots are handed out at this stride, starting just above SP.
const SPILL_SLOT_STRIDE: i32 = 4;

/// Which allocator to run.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AllocationStrategy {
    /// Hand registers to virtuals in id order; spill once the pool is dry.
    Naive,
    /// Interference-graph coloring with spilling.
    Graph,
}

impl FromStr for AllocationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<AllocationStrategy, String> {
        match s {
            "naive" => Ok(AllocationStrategy::Naive),
            "graph" => Ok(AllocationStrategy::Graph),
            other => Err(format!(
                "unknown allocation strategy '{}' (expected 'naive' or 'graph')",
                other
            )),
        }
    }
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocationStrategy::Naive => write!(f, "naive"),
            AllocationStrategy::Graph => write!(f, "graph"),
        }
    }
}

/// Runs the selected allocator over a method whose liveness intervals are
/// already computed, then inserts spill code.
pub fn allocate(cfg: &mut Cfg, strategy: AllocationStrategy) -> Result<(), Error> {
    match strategy {
        AllocationStrategy::Naive => naive::run(cfg),
        AllocationStrategy::Graph => graph::run(cfg)?,
    }
    insert_spill_code(cfg);
    Ok(())
}

/// Marks `reg` as spilled at the next free slot and parks it on the zero
/// register between uses.
fn spill(cfg: &mut Cfg, reg: u32, next_offset: &mut i32) {
    let vreg = cfg.registers[reg as usize]
        .as_mut()
        .and_then(|r| r.as_virtual_mut())
        .expect("spill target is a virtual register");
    vreg.spill = true;
    vreg.offset = Some(*next_offset);
    vreg.preg = Some(ZERO);
    *next_offset += SPILL_SLOT_STRIDE;
    log::debug!("spilled v{} to offset {}", reg, vreg.offset.unwrap());
}

fn spill_offset(cfg: &Cfg, reg: RegId) -> Option<i32> {
    cfg.registers[reg.0 as usize]
        .as_ref()
        .and_then(|r| r.as_virtual())
        .filter(|v| v.spill)
        .and_then(|v| v.offset)
}

/// Rewrites spilled registers through memory: every read gets a reload
/// immediately before the instruction, every write a store immediately
/// after, each through the address scratch `r11`.
///
/// The block's instruction list is rebuilt from a snapshot, never indexed
/// while growing. Ids are renumbered densely afterwards since the inserts
/// overrun the four-slot gaps when an instruction reads two spilled values.
pub fn insert_spill_code(cfg: &mut Cfg) {
    let scratch = cfg.use_physical(SCRATCH);
    let zero = cfg.use_physical(ZERO);
    let sp = cfg.use_physical(SP);

    for index in 0..cfg.blocks.len() {
        let original = std::mem::take(&mut cfg.blocks[index].lir);
        let mut rewritten: Vec<Lir> = Vec::with_capacity(original.len());

        for mut lir in original {
            let id = lir.id;

            // Call arguments travel on the stack; their reloads already
            // happened at the pushes.
            let is_call = matches!(lir.kind, LirKind::Call { .. });
            if !is_call {
                let mut seen: Vec<RegId> = Vec::new();
                let mut reloaded = 0;
                for read in lir.reads() {
                    if seen.contains(&read) {
                        continue;
                    }
                    seen.push(read);
                    let offset = match spill_offset(cfg, read) {
                        Some(o) => o,
                        None => continue,
                    };
                    // First reload lands in r0; a second spilled operand
                    // reuses the address scratch as its data register (the
                    // address is dead once the load retires).
                    let data = if reloaded == 0 { zero } else { scratch };
                    reloaded += 1;
                    rewritten.push(Lir {
                        id: id - 3,
                        kind: LirKind::Copy { dst: scratch, src: sp },
                    });
                    rewritten.push(Lir {
                        id: id - 2,
                        kind: LirKind::Inc {
                            reg: scratch,
                            value: offset,
                        },
                    });
                    rewritten.push(Lir {
                        id: id - 1,
                        kind: LirKind::Load {
                            dst: data,
                            base: scratch,
                        },
                    });
                    lir.replace_read(read, data);
                }
            }

            let spilled_write = lir.write().and_then(|w| {
                spill_offset(cfg, w).map(|offset| (w, offset))
            });
            if let Some((write, _)) = spilled_write {
                lir.replace_write(write, zero);
            }
            rewritten.push(lir);
            if let Some((_, offset)) = spilled_write {
                rewritten.push(Lir {
                    id: id + 1,
                    kind: LirKind::Copy { dst: scratch, src: sp },
                });
                rewritten.push(Lir {
                    id: id + 2,
                    kind: LirKind::Inc {
                        reg: scratch,
                        value: offset,
                    },
                });
                rewritten.push(Lir {
                    id: id + 3,
                    kind: LirKind::Store {
                        src: zero,
                        base: scratch,
                    },
                });
            }
        }

        cfg.blocks[index].lir = rewritten;
    }

    cfg.renumber_lir();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::ConstantPool;

    pub(crate) fn compiled(code: &[u8], strategy: AllocationStrategy) -> Cfg {
        let pool = ConstantPool::new();
        let mut cfg = Cfg::build("t", "()I", 0, code, &pool).unwrap();
        cfg.build_hir().unwrap();
        cfg.cleanup_phi_functions();
        cfg.lower_to_lir();
        cfg.resolve_phi_functions();
        cfg.renumber_lir();
        cfg.compute_liveness();
        allocate(&mut cfg, strategy).unwrap();
        cfg
    }

    /// `count` constants pushed, then summed down to one value.
    pub(crate) fn wide_expression(count: usize) -> Vec<u8> {
        let mut code = vec![0x04; count];
        code.extend(std::iter::repeat(0x60).take(count - 1));
        code.push(0xac);
        code
    }

    #[test]
    fn naive_allocator_spills_past_the_pool() {
        let cfg = compiled(&wide_expression(4), AllocationStrategy::Naive);
        let pool: Vec<u8> = crate::regs::allocatable().collect();
        let virtuals: Vec<&crate::regs::VirtualRegister> = cfg
            .registers
            .iter()
            .flatten()
            .filter_map(|r| r.as_virtual())
            .collect();
        // 4 constants + 3 sums = 7 virtuals, all within the ten-register pool.
        assert_eq!(virtuals.len(), 7);
        for (i, vreg) in virtuals.iter().enumerate() {
            assert_eq!(vreg.preg, Some(pool[i]));
            assert!(!vreg.spill);
        }
    }

    #[test]
    fn naive_allocator_assigns_distinct_offsets_once_dry() {
        let cfg = compiled(&wide_expression(15), AllocationStrategy::Naive);
        let spilled: Vec<i32> = cfg
            .registers
            .iter()
            .flatten()
            .filter_map(|r| r.as_virtual())
            .filter(|v| v.spill)
            .map(|v| v.offset.unwrap())
            .collect();
        // 15 + 14 = 29 virtuals against a pool of 10.
        assert_eq!(spilled.len(), 19);
        let mut sorted = spilled.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), spilled.len());
    }

    #[test]
    fn spilled_reads_reload_and_writes_store() {
        let cfg = compiled(&wide_expression(15), AllocationStrategy::Graph);
        for block in &cfg.blocks {
            for (i, lir) in block.lir.iter().enumerate() {
                // After rewriting, no instruction references a spilled
                // virtual register directly.
                for read in lir.reads() {
                    assert!(spill_offset(&cfg, read).is_none());
                }
                if let Some(write) = lir.write() {
                    assert!(spill_offset(&cfg, write).is_none());
                }
                // Every store is the tail of a copy/addn/store triple.
                if matches!(lir.kind, LirKind::Store { .. }) {
                    assert!(i >= 2);
                    assert!(matches!(block.lir[i - 1].kind, LirKind::Inc { .. }));
                    assert!(matches!(block.lir[i - 2].kind, LirKind::Copy { .. }));
                }
            }
        }
    }

    #[test]
    fn spill_offsets_start_above_the_stack_pointer() {
        let cfg = compiled(&wide_expression(15), AllocationStrategy::Graph);
        for vreg in cfg.registers.iter().flatten().filter_map(|r| r.as_virtual()) {
            if let Some(offset) = vreg.offset {
                assert!(offset >= SPILL_SLOT_STRIDE);
                assert_eq!(offset % SPILL_SLOT_STRIDE, 0);
            }
        }
    }
}
