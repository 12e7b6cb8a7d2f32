//! The naive allocator: physical registers are handed to virtual registers
//! in id order, with no liveness reuse; once the pool runs dry everything
//! else spills. Useful as a baseline and for debugging the spill machinery.

use crate::alloc::spill;
use crate::cfg::Cfg;
use crate::regs::{allocatable, NUM_PHYSICAL};

pub(crate) fn run(cfg: &mut Cfg) {
    let pool: Vec<u8> = allocatable().collect();
    let mut next_offset = super::SPILL_SLOT_STRIDE;
    for id in NUM_PHYSICAL..cfg.registers.len() {
        let slot = id - NUM_PHYSICAL;
        if slot < pool.len() {
            if let Some(vreg) = cfg.registers[id]
                .as_mut()
                .and_then(|r| r.as_virtual_mut())
            {
                vreg.preg = Some(pool[slot]);
            }
        } else {
            spill(cfg, id as u32, &mut next_offset);
        }
    }
}
