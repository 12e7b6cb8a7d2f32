//! HIR to LIR lowering, φ resolution, and renumbering.

use crate::cfg::{BlockId, Cfg};
use crate::hir::{HirId, HirKind};
use crate::lir::{Lir, LirKind, Lowered, LIR_ID_GAP};
use crate::regs::{NUM_PHYSICAL, FP, RV, SCRATCH, SP};
use std::io;

impl Cfg {
    /// Lowers every block's HIR into LIR. Lowering is memoised per HIR id:
    /// each value is materialised once, where it is defined, and later uses
    /// see the same destination register.
    pub fn lower_to_lir(&mut self) {
        self.next_lir_id = 0;
        self.lowered = vec![None; self.hir.len()];
        if self.registers.is_empty() {
            self.registers = (0..NUM_PHYSICAL).map(|_| None).collect();
        }
        for index in 0..self.blocks.len() {
            for hir in self.blocks[index].hir.clone() {
                self.lower_hir(hir);
            }
        }
    }

    pub(crate) fn lower_hir(&mut self, id: HirId) -> Lowered {
        let id = self.resolve_hir(id);
        if let Some(done) = self.lowered[id.index()] {
            return done;
        }
        let ins = self.hir[id.index()].clone();
        let block = ins.block;

        let lowered = match ins.kind {
            HirKind::IntConst { value } => {
                let dst = self.new_vreg();
                self.push_lir(block, LirKind::IntConst { dst, value });
                Lowered { result: Some(dst) }
            }

            HirKind::Arithmetic { op, lhs, rhs } => {
                let lhs = self.operand(lhs);
                let rhs = self.operand(rhs);
                let dst = self.new_vreg();
                self.push_lir(block, LirKind::Arithmetic { op, dst, lhs, rhs });
                Lowered { result: Some(dst) }
            }

            // The i-th argument sits at FP - (i + 3): below the saved frame
            // pointer and return address, in the caller's push area.
            HirKind::LoadParam { index } => {
                let scratch = self.use_physical(SCRATCH);
                let fp = self.use_physical(FP);
                self.push_lir(block, LirKind::Copy { dst: scratch, src: fp });
                self.push_lir(
                    block,
                    LirKind::Inc {
                        reg: scratch,
                        value: -(index as i32 + 3),
                    },
                );
                let dst = self.new_vreg();
                self.push_lir(block, LirKind::Load { dst, base: scratch });
                Lowered { result: Some(dst) }
            }

            HirKind::Jump { target } => {
                self.push_lir(block, LirKind::Jump { target });
                Lowered { result: None }
            }

            HirKind::CondJump {
                op,
                lhs,
                rhs,
                on_true,
                on_false,
            } => {
                let lhs = self.operand(lhs);
                let rhs = self.operand(rhs);
                self.push_lir(
                    block,
                    LirKind::CondJump {
                        op,
                        lhs,
                        rhs,
                        on_true,
                        on_false,
                    },
                );
                Lowered { result: None }
            }

            HirKind::Call {
                name,
                args,
                return_tag,
                is_io,
            } => {
                if is_io && name == "read" {
                    let dst = self.new_vreg();
                    self.push_lir(block, LirKind::Read { dst });
                    Lowered { result: Some(dst) }
                } else if is_io && name == "write" {
                    let src = self.operand(args[0]);
                    self.push_lir(block, LirKind::Write { src });
                    Lowered { result: None }
                } else {
                    let sp = self.use_physical(SP);
                    let mut arg_regs = vec![None; args.len()];
                    for i in (0..args.len()).rev() {
                        let src = self.operand(args[i]);
                        arg_regs[i] = Some(src);
                        self.push_lir(block, LirKind::Push { src, sp });
                    }
                    let returns_value = return_tag != "V";
                    if returns_value {
                        self.use_physical(RV);
                    }
                    self.push_lir(
                        block,
                        LirKind::Call {
                            name,
                            args: arg_regs.into_iter().flatten().collect(),
                            returns_value,
                        },
                    );
                    if !args.is_empty() {
                        self.push_lir(
                            block,
                            LirKind::Inc {
                                reg: sp,
                                value: -(args.len() as i32),
                            },
                        );
                    }
                    if returns_value {
                        let rv = self.use_physical(RV);
                        let dst = self.new_vreg();
                        self.push_lir(block, LirKind::Copy { dst, src: rv });
                        Lowered { result: Some(dst) }
                    } else {
                        Lowered { result: None }
                    }
                }
            }

            HirKind::Return { value } => {
                match value {
                    None => {
                        self.push_lir(block, LirKind::Return { value: None });
                    }
                    Some(v) => {
                        let src = self.operand(v);
                        let rv = self.use_physical(RV);
                        self.push_lir(block, LirKind::Copy { dst: rv, src });
                        self.push_lir(block, LirKind::Return { value: Some(rv) });
                    }
                }
                Lowered { result: None }
            }

            // φ's claim their destination register here but emit no code;
            // the copies appear in the predecessors during φ resolution.
            HirKind::Phi { .. } => {
                let dst = self.new_vreg();
                Lowered { result: Some(dst) }
            }
        };

        self.lowered[id.index()] = Some(lowered);
        lowered
    }

    /// Inserts, for every surviving φ, one copy `φ.dst ← arg.dst` at the end
    /// of each predecessor (above its terminating jump, if it has one).
    /// After this pass φ's have no LIR presence at all.
    pub fn resolve_phi_functions(&mut self) {
        for id in 0..self.hir.len() {
            if self.hir_map[id] != id as u32 {
                continue;
            }
            let (block, args) = match &self.hir[id].kind {
                HirKind::Phi { args, .. } => (self.hir[id].block, args.clone()),
                _ => continue,
            };
            let dst = match self.lowered[id].and_then(|l| l.result) {
                Some(dst) => dst,
                None => continue,
            };
            let preds = self.blocks[block.index()].predecessors.clone();
            for (j, arg) in args.iter().enumerate() {
                let arg = match arg {
                    Some(a) => *a,
                    None => continue,
                };
                let src = match self.lowered[self.resolve_hir(arg).index()].and_then(|l| l.result)
                {
                    Some(src) => src,
                    None => continue,
                };
                let copy = Lir {
                    id: self.next_lir_id,
                    kind: LirKind::Copy { dst, src },
                };
                self.next_lir_id += 1;
                let pred = &mut self.blocks[preds[j].index()];
                match pred.lir.last() {
                    Some(last) if last.is_jump() => {
                        let at = pred.lir.len() - 1;
                        pred.lir.insert(at, copy);
                    }
                    _ => pred.lir.push(copy),
                }
            }
        }
    }

    /// Renumbers all LIR ids across blocks in layout order as multiples of
    /// [`LIR_ID_GAP`], leaving room for spill code between instructions.
    pub fn renumber_lir(&mut self) {
        let mut next = 0;
        for block in &mut self.blocks {
            for lir in &mut block.lir {
                lir.id = next;
                next += LIR_ID_GAP;
            }
        }
    }

    // The register holding an operand's value.
    fn operand(&mut self, id: HirId) -> crate::regs::RegId {
        self.lower_hir(id)
            .result
            .expect("operand lowers to a value")
    }

    fn push_lir(&mut self, block: BlockId, kind: LirKind) {
        let lir = Lir {
            id: self.next_lir_id,
            kind,
        };
        self.next_lir_id += 1;
        self.blocks[block.index()].lir.push(lir);
    }

    /// Dumps the LIR of every block.
    pub fn write_lir(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "[[ LIR ]]")?;
        writeln!(out)?;
        for block in &self.blocks {
            writeln!(out, "{}:", block.describe())?;
            for lir in &block.lir {
                writeln!(out, "  {}", lir)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
