//! Symbolic stack execution: tuples to SSA-form HIR.

use crate::cfg::{BlockId, Cfg, Opcode, Operand, Tuple};
use crate::classfile::{is_io_method, Descriptor, MethodDescriptor};
use crate::errors::Error;
use crate::hir::{ArithOp, CondOp, HirId, HirInstruction, HirKind};
use std::collections::VecDeque;
use std::io;

impl Cfg {
    /// Converts every block's tuples into HIR, inserting φ-functions at
    /// joins. Blocks are walked breadth-first from the entry so that each
    /// block's starting state vector is available when it is reached (loop
    /// heads merge in their back edges during [`Cfg::cleanup_phi_functions`]).
    pub fn build_hir(&mut self) -> Result<(), Error> {
        let mut entry_locals: Vec<Option<HirId>> = vec![None; self.num_locals];
        let num_params = self.descriptor.parameter_count().min(self.num_locals);
        for index in 0..num_params {
            let id = self.new_hir(BlockId(0), HirKind::LoadParam { index });
            self.blocks[0].hir.push(id);
            entry_locals[index] = Some(id);
        }
        self.blocks[0].locals = Some(entry_locals);

        for block in &mut self.blocks {
            block.visited = false;
        }
        self.blocks[0].visited = true;

        let mut stack: Vec<HirId> = Vec::new();
        let mut queue: VecDeque<BlockId> = VecDeque::new();
        queue.push_back(BlockId(0));
        while let Some(block) = queue.pop_front() {
            for succ in self.blocks[block.index()].successors.clone() {
                if !self.blocks[succ.index()].visited {
                    self.blocks[succ.index()].visited = true;
                    queue.push_back(succ);
                }
            }

            let preds = self.blocks[block.index()].predecessors.clone();
            if preds.len() == 1 {
                self.blocks[block.index()].locals =
                    self.blocks[preds[0].index()].locals.clone();
            } else if preds.len() > 1 {
                self.merge_locals(block, &preds);
            }

            let tuples: Vec<Tuple> = self.blocks[block.index()].tuples.clone();
            for tuple in &tuples {
                self.interpret_tuple(block, tuple, &mut stack)?;
            }
        }
        Ok(())
    }

    fn interpret_tuple(
        &mut self,
        block: BlockId,
        tuple: &Tuple,
        stack: &mut Vec<HirId>,
    ) -> Result<(), Error> {
        match tuple.opcode {
            Opcode::Iconst0 | Opcode::Iconst1 | Opcode::Ldc => {
                let value = match tuple.operand {
                    Operand::Constant(v) => v,
                    _ => unreachable!("constant tuple without constant operand"),
                };
                let id = self.emit_hir(block, HirKind::IntConst { value });
                stack.push(id);
            }
            Opcode::Iload => {
                let index = self.local_index(tuple)?;
                let value = self.blocks[block.index()]
                    .locals
                    .as_ref()
                    .and_then(|locals| locals[index])
                    .ok_or_else(|| {
                        Error::malformed(
                            &self.name,
                            format!("load of uninitialized local {} at pc {}", index, tuple.pc),
                        )
                    })?;
                stack.push(value);
            }
            Opcode::Istore => {
                let index = self.local_index(tuple)?;
                let value = self.pop(stack, tuple.pc)?;
                self.blocks[block.index()]
                    .locals
                    .as_mut()
                    .expect("locals initialised before interpretation")[index] = Some(value);
            }
            Opcode::Dup => {
                let top = *stack
                    .last()
                    .ok_or_else(|| self.underflow(tuple.pc))?;
                stack.push(top);
            }
            Opcode::Pop => {
                self.pop(stack, tuple.pc)?;
            }
            Opcode::Ineg => {
                // Negation is multiplication by -1; there is no dedicated
                // negate past this point.
                let minus_one = self.emit_hir(block, HirKind::IntConst { value: -1 });
                let operand = self.pop(stack, tuple.pc)?;
                let id = self.emit_hir(
                    block,
                    HirKind::Arithmetic {
                        op: ArithOp::Mul,
                        lhs: minus_one,
                        rhs: operand,
                    },
                );
                stack.push(id);
            }
            Opcode::Iadd | Opcode::Isub | Opcode::Imul | Opcode::Idiv | Opcode::Irem => {
                let op = match tuple.opcode {
                    Opcode::Iadd => ArithOp::Add,
                    Opcode::Isub => ArithOp::Sub,
                    Opcode::Imul => ArithOp::Mul,
                    Opcode::Idiv => ArithOp::Div,
                    _ => ArithOp::Rem,
                };
                let rhs = self.pop(stack, tuple.pc)?;
                let lhs = self.pop(stack, tuple.pc)?;
                let id = self.emit_hir(block, HirKind::Arithmetic { op, lhs, rhs });
                stack.push(id);
            }
            Opcode::Goto => {
                let target = self.branch_block(tuple)?;
                self.emit_hir(block, HirKind::Jump { target });
            }
            Opcode::Ifeq | Opcode::Ifne => {
                // Zero-compare branches become ordinary compares against a
                // materialised 0.
                let op = if tuple.opcode == Opcode::Ifeq {
                    CondOp::Eq
                } else {
                    CondOp::Ne
                };
                let zero = self.emit_hir(block, HirKind::IntConst { value: 0 });
                let lhs = self.pop(stack, tuple.pc)?;
                let on_true = self.branch_block(tuple)?;
                let on_false = self.fallthrough_block(tuple)?;
                self.emit_hir(
                    block,
                    HirKind::CondJump {
                        op,
                        lhs,
                        rhs: zero,
                        on_true,
                        on_false,
                    },
                );
            }
            Opcode::IfIcmpeq
            | Opcode::IfIcmpne
            | Opcode::IfIcmplt
            | Opcode::IfIcmpge
            | Opcode::IfIcmpgt
            | Opcode::IfIcmple => {
                let op = match tuple.opcode {
                    Opcode::IfIcmpeq => CondOp::Eq,
                    Opcode::IfIcmpne => CondOp::Ne,
                    Opcode::IfIcmplt => CondOp::Lt,
                    Opcode::IfIcmpge => CondOp::Ge,
                    Opcode::IfIcmpgt => CondOp::Gt,
                    _ => CondOp::Le,
                };
                let rhs = self.pop(stack, tuple.pc)?;
                let lhs = self.pop(stack, tuple.pc)?;
                let on_true = self.branch_block(tuple)?;
                let on_false = self.fallthrough_block(tuple)?;
                self.emit_hir(
                    block,
                    HirKind::CondJump {
                        op,
                        lhs,
                        rhs,
                        on_true,
                        on_false,
                    },
                );
            }
            Opcode::Invokestatic => {
                let (name, descriptor) = match &tuple.operand {
                    Operand::Call { name, descriptor } => (name.clone(), descriptor.clone()),
                    _ => unreachable!("call tuple without call operand"),
                };
                let callee = MethodDescriptor::parse(&descriptor)
                    .map_err(|e| Error::malformed(&self.name, e.to_string()))?;
                let mut args = vec![HirId(0); callee.parameter_count()];
                for slot in args.iter_mut().rev() {
                    *slot = self.pop(stack, tuple.pc)?;
                }
                let return_tag = callee.return_tag();
                let is_io = is_io_method(&name, &descriptor);
                let id = self.emit_hir(
                    block,
                    HirKind::Call {
                        name,
                        args,
                        return_tag,
                        is_io,
                    },
                );
                if return_tag != "V" {
                    stack.push(id);
                }
            }
            Opcode::Ireturn => {
                let value = self.pop(stack, tuple.pc)?;
                self.emit_hir(block, HirKind::Return { value: Some(value) });
            }
            Opcode::Return => {
                self.emit_hir(block, HirKind::Return { value: None });
            }
        }
        Ok(())
    }

    /// Rewrites every φ's arguments from its predecessors' final state
    /// vectors, then folds away the redundant ones.
    ///
    /// A φ is redundant when it is a trivial self-cycle at a loop head (its
    /// back-edge argument is the φ itself) or, elsewhere, when all arguments
    /// agree. Folding rewrites the value-numbering table so existing
    /// references resolve to the representative argument.
    pub fn cleanup_phi_functions(&mut self) {
        for id in 0..self.hir.len() {
            if self.hir_map[id] != id as u32 {
                continue;
            }
            let (block, index) = match &self.hir[id].kind {
                HirKind::Phi { index, .. } => (self.hir[id].block, *index),
                _ => continue,
            };

            let preds = self.blocks[block.index()].predecessors.clone();
            let new_args: Vec<Option<HirId>> = preds
                .iter()
                .map(|p| {
                    self.blocks[p.index()]
                        .locals
                        .as_ref()
                        .and_then(|locals| locals[index])
                })
                .collect();

            let redundant = if self.blocks[block.index()].is_loop_head {
                new_args.get(1).copied().flatten() == Some(HirId(id as u32))
                    && new_args.first().copied().flatten().is_some()
            } else {
                match new_args.first().copied().flatten() {
                    Some(first) => new_args.iter().all(|a| *a == Some(first)),
                    None => false,
                }
            };

            if let HirKind::Phi { args, .. } = &mut self.hir[id].kind {
                *args = new_args.clone();
            }

            if redundant {
                let representative = new_args[0].unwrap();
                self.blocks[block.index()].hir.retain(|h| h.0 != id as u32);
                self.hir_map[id] = representative.0;
            }
        }
    }

    /// Follows the value-numbering table to the representative instruction.
    pub fn resolve_hir(&self, id: HirId) -> HirId {
        let mut current = id;
        loop {
            let next = HirId(self.hir_map[current.index()]);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    /// The (representative) instruction behind `id`.
    pub fn hir_value(&self, id: HirId) -> &HirInstruction {
        &self.hir[self.resolve_hir(id).index()]
    }

    pub(crate) fn new_hir(&mut self, block: BlockId, kind: HirKind) -> HirId {
        let id = HirId(self.hir.len() as u32);
        self.hir.push(HirInstruction { id, block, kind });
        self.hir_map.push(id.0);
        id
    }

    // Creates the instruction and appends it to the block's HIR list.
    fn emit_hir(&mut self, block: BlockId, kind: HirKind) -> HirId {
        let id = self.new_hir(block, kind);
        self.blocks[block.index()].hir.push(id);
        id
    }

    // One φ per local slot, arguments filled per predecessor (still-unwalked
    // predecessors contribute `None` until cleanup).
    fn merge_locals(&mut self, block: BlockId, preds: &[BlockId]) {
        let mut locals = vec![None; self.num_locals];
        for (index, slot) in locals.iter_mut().enumerate() {
            let args: Vec<Option<HirId>> = preds
                .iter()
                .map(|p| {
                    self.blocks[p.index()]
                        .locals
                        .as_ref()
                        .and_then(|l| l[index])
                })
                .collect();
            let id = self.emit_hir(block, HirKind::Phi { index, args });
            *slot = Some(id);
        }
        self.blocks[block.index()].locals = Some(locals);
    }

    fn pop(&self, stack: &mut Vec<HirId>, pc: u32) -> Result<HirId, Error> {
        stack.pop().ok_or_else(|| self.underflow(pc))
    }

    fn underflow(&self, pc: u32) -> Error {
        Error::malformed(&self.name, format!("operand stack underflow at pc {}", pc))
    }

    fn local_index(&self, tuple: &Tuple) -> Result<usize, Error> {
        let index = match tuple.operand {
            Operand::Local(i) => i as usize,
            _ => unreachable!("local tuple without local operand"),
        };
        if index >= self.num_locals {
            return Err(Error::malformed(
                &self.name,
                format!(
                    "local index {} at pc {} exceeds max locals {}",
                    index, tuple.pc, self.num_locals
                ),
            ));
        }
        Ok(index)
    }

    fn branch_block(&self, tuple: &Tuple) -> Result<BlockId, Error> {
        let target = tuple.branch_target().expect("branch tuple");
        self.block_at_pc(target).ok_or_else(|| {
            Error::unreachable(
                &self.name,
                format!("branch at pc {} targets unmapped pc {}", tuple.pc, target),
            )
        })
    }

    // Conditional branches are three bytes wide; the false edge continues
    // right after them.
    fn fallthrough_block(&self, tuple: &Tuple) -> Result<BlockId, Error> {
        self.block_at_pc(tuple.pc + 3).ok_or_else(|| {
            Error::unreachable(
                &self.name,
                format!("no instruction follows the branch at pc {}", tuple.pc),
            )
        })
    }

    /// Renders one HIR instruction the way the dumps print it.
    pub fn hir_to_string(&self, id: HirId) -> String {
        let ins = &self.hir[id.index()];
        let tid = ins.tagged_id();
        match &ins.kind {
            HirKind::LoadParam { index } => format!("{}: ldparam {}", tid, index),
            HirKind::IntConst { value } => format!("{}: ldc {}", tid, value),
            HirKind::Arithmetic { op, lhs, rhs } => format!(
                "{}: {} {} {}",
                tid,
                self.hir_value(*lhs).tagged_id(),
                op.symbol(),
                self.hir_value(*rhs).tagged_id()
            ),
            HirKind::Jump { target } => format!("{}: goto {}", tid, target),
            HirKind::CondJump {
                op,
                lhs,
                rhs,
                on_true,
                on_false,
            } => format!(
                "{}: if {} {} {} then {} else {}",
                tid,
                self.hir_value(*lhs).tagged_id(),
                op.symbol(),
                self.hir_value(*rhs).tagged_id(),
                on_true,
                on_false
            ),
            HirKind::Call { name, args, .. } => {
                let rendered: Vec<String> = args
                    .iter()
                    .map(|a| self.hir_value(*a).tagged_id())
                    .collect();
                format!("{}: call {}({})", tid, name, rendered.join(", "))
            }
            HirKind::Return { value: None } => format!("{}: return", tid),
            HirKind::Return { value: Some(v) } => {
                format!("{}: ireturn {}", tid, self.hir_value(*v).tagged_id())
            }
            HirKind::Phi { args, .. } => {
                let rendered: Vec<String> = args
                    .iter()
                    .map(|a| match a {
                        Some(id) => self.hir_value(*id).tagged_id(),
                        None => "?".to_owned(),
                    })
                    .collect();
                format!("{}: phi({})", tid, rendered.join(", "))
            }
        }
    }

    /// Dumps the HIR of every block, including the entry state vectors.
    pub fn write_hir(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "[[ HIR ]]")?;
        writeln!(out)?;
        for block in &self.blocks {
            let locals = match &block.locals {
                Some(locals) => {
                    let slots: Vec<String> = locals
                        .iter()
                        .map(|slot| match slot {
                            Some(id) => self.hir_value(*id).tagged_id(),
                            None => "?".to_owned(),
                        })
                        .collect();
                    format!("[{}]", slots.join(", "))
                }
                None => "[]".to_owned(),
            };
            let header = block.describe();
            writeln!(
                out,
                "{}, locals: {}):",
                header.trim_end_matches(')'),
                locals
            )?;
            for hir in &block.hir {
                writeln!(out, "  {}", self.hir_to_string(*hir))?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::ConstantPool;

    fn compile_hir(descriptor: &str, max_locals: u16, code: &[u8]) -> Cfg {
        let pool = ConstantPool::new();
        let mut cfg = Cfg::build("t", descriptor, max_locals, code, &pool).unwrap();
        cfg.build_hir().unwrap();
        cfg
    }

    #[test]
    fn parameters_become_load_params_in_entry_block() {
        // iload 0; iload 1; iadd; ireturn
        let cfg = compile_hir("(II)I", 2, &[0x15, 0x00, 0x15, 0x01, 0x60, 0xac]);
        let entry = &cfg.blocks[0];
        assert_eq!(entry.hir.len(), 2);
        assert!(matches!(
            cfg.hir[entry.hir[0].index()].kind,
            HirKind::LoadParam { index: 0 }
        ));
        assert!(matches!(
            cfg.hir[entry.hir[1].index()].kind,
            HirKind::LoadParam { index: 1 }
        ));
    }

    #[test]
    fn hir_ids_are_arena_indices() {
        let cfg = compile_hir("(II)I", 2, &[0x15, 0x00, 0x15, 0x01, 0x60, 0xac]);
        for (i, ins) in cfg.hir.iter().enumerate() {
            assert_eq!(ins.id.index(), i);
            assert_eq!(cfg.hir_map[i], i as u32);
        }
    }

    #[test]
    fn negation_is_multiplication_by_minus_one() {
        // iload 0; ineg; ireturn
        let cfg = compile_hir("(I)I", 1, &[0x15, 0x00, 0x74, 0xac]);
        let kinds: Vec<&HirKind> = cfg.hir.iter().map(|h| &h.kind).collect();
        assert!(kinds
            .iter()
            .any(|k| matches!(k, HirKind::IntConst { value: -1 })));
        assert!(kinds.iter().any(
            |k| matches!(k, HirKind::Arithmetic { op: ArithOp::Mul, .. })
        ));
    }

    // int f(int n) { int r = 1; while (r < n) r = r + r; return r; }
    // pcs: 0 iconst_1, 1 istore 1, 3 iload 1, 5 iload 0, 7 if_icmpge -> 20,
    //      10 iload 1, 12 iload 1, 14 iadd, 15 istore 1, 17 goto -> 3,
    //      20 iload 1, 22 ireturn
    fn loop_code() -> Vec<u8> {
        vec![
            0x04, 0x36, 0x01, 0x15, 0x01, 0x15, 0x00, 0xa2, 0x00, 0x0d, 0x15, 0x01, 0x15, 0x01,
            0x60, 0x36, 0x01, 0xa7, 0xff, 0xf2, 0x15, 0x01, 0xac,
        ]
    }

    #[test]
    fn join_blocks_get_one_phi_per_local() {
        let code = loop_code();
        let cfg = compile_hir("(I)I", 2, &code);
        let head = cfg.block_at_pc(3).unwrap();
        assert!(cfg.block(head).is_loop_head);
        let phis: Vec<&HirInstruction> = cfg
            .block(head)
            .hir
            .iter()
            .map(|h| &cfg.hir[h.index()])
            .filter(|h| h.is_phi())
            .collect();
        assert_eq!(phis.len(), cfg.num_locals);
        for phi in phis {
            if let HirKind::Phi { args, .. } = &phi.kind {
                assert_eq!(args.len(), cfg.block(head).predecessors.len());
            }
        }
    }

    #[test]
    fn cleanup_folds_parameter_phis() {
        let code = loop_code();
        let pool = ConstantPool::new();
        let mut cfg = Cfg::build("t", "(I)I", 2, &code, &pool).unwrap();
        cfg.build_hir().unwrap();
        cfg.cleanup_phi_functions();

        let head = cfg.block_at_pc(3).unwrap();
        let remaining: Vec<usize> = cfg
            .block(head)
            .hir
            .iter()
            .filter_map(|h| match &cfg.hir[h.index()].kind {
                HirKind::Phi { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        // Local 0 is the unmodified parameter: its φ folds away. Local 1 is
        // the accumulator: its φ survives.
        assert_eq!(remaining, vec![1]);

        // The folded φ now resolves to the parameter.
        let param_phi = cfg
            .hir
            .iter()
            .position(|h| matches!(h.kind, HirKind::Phi { index: 0, .. }))
            .unwrap();
        assert!(matches!(
            cfg.hir_value(HirId(param_phi as u32)).kind,
            HirKind::LoadParam { index: 0 }
        ));
    }

    #[test]
    fn ssa_values_have_unique_definitions() {
        let cfg = compile_hir("(I)I", 2, &loop_code());
        let mut seen = std::collections::HashSet::new();
        for block in &cfg.blocks {
            for hir in &block.hir {
                assert!(seen.insert(hir.0), "HIR {} defined twice", hir.0);
            }
        }
    }
}
