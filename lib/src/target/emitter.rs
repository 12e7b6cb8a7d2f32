//! The emitter: drives the per-method pipeline, maps LIR onto target
//! instructions, lays the whole program out, resolves jumps, and writes the
//! assembly text.

use crate::alloc::{self, AllocationStrategy};
use crate::cfg::{BlockId, Cfg};
use crate::classfile::{is_io_method, ClassFile, MethodInfo};
use crate::errors::Error;
use crate::lir::LirKind;
use crate::regs::{allocatable, RegId, FP, RA, SP};
use crate::target::{BranchDest, TargetInstruction, TargetKind};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Compiles every method of a class and writes one assembly file.
///
/// Errors inside one method's pipeline are reported to stderr and recorded;
/// the remaining methods still compile. [`Emitter::error_has_occurred`]
/// tells the driver whether to exit nonzero.
pub struct Emitter {
    source_stem: String,
    methods: Vec<CompiledMethod>,
    error_has_occurred: bool,
}

struct CompiledMethod {
    name: String,
    raw_descriptor: String,
    cfg: Cfg,
    epilogue: Vec<TargetInstruction>,
}

impl CompiledMethod {
    fn called_names(&self) -> impl Iterator<Item = &str> {
        self.cfg
            .blocks
            .iter()
            .flat_map(|b| b.lir.iter())
            .filter_map(|lir| match &lir.kind {
                LirKind::Call { name, .. } => Some(name.as_str()),
                _ => None,
            })
    }
}

impl Emitter {
    /// Compiles all methods of `class` (the runtime IO methods are skipped,
    /// they only exist to be called).
    pub fn new(
        source_file: &Path,
        class: &ClassFile,
        strategy: AllocationStrategy,
        verbose: bool,
    ) -> Emitter {
        let source_stem = source_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_owned());
        let mut emitter = Emitter {
            source_stem,
            methods: Vec::new(),
            error_has_occurred: false,
        };

        for method in &class.methods {
            if is_io_method(&method.name, &method.descriptor) {
                continue;
            }
            match compile_method(method, class, strategy, verbose) {
                Ok(compiled) => emitter.methods.push(compiled),
                Err(err) => emitter.report_error(err),
            }
        }

        emitter.check_call_targets();
        emitter
    }

    pub fn error_has_occurred(&self) -> bool {
        self.error_has_occurred
    }

    /// Writes `<dest_dir>/<source stem>.s` and returns its path.
    pub fn write(&mut self, dest_dir: &Path) -> Result<PathBuf, Error> {
        let path = dest_dir.join(format!("{}.s", self.source_stem));
        let mut out = BufWriter::new(File::create(&path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        log::info!("wrote {}", path.display());
        Ok(path)
    }

    /// Lays out every method with ascending pcs, patches branch and call
    /// immediates, and writes the assembly text. Methods appear in source
    /// order, each preceded by a header comment.
    pub fn write_to(&mut self, out: &mut impl io::Write) -> Result<(), Error> {
        // Layout pass: assign pcs and record where everything landed.
        let mut pc = 0usize;
        let mut method_entries: HashMap<String, usize> = HashMap::new();
        let mut layouts: Vec<(Vec<usize>, usize)> = Vec::with_capacity(self.methods.len());
        for method in &mut self.methods {
            method_entries.insert(method.name.clone(), pc);
            let mut block_pcs = Vec::with_capacity(method.cfg.blocks.len());
            for block in &mut method.cfg.blocks {
                block_pcs.push(pc);
                for instr in &mut block.target {
                    instr.pc = pc;
                    pc += 1;
                }
            }
            let exit_pc = pc;
            for instr in &mut method.epilogue {
                instr.pc = pc;
                pc += 1;
            }
            layouts.push((block_pcs, exit_pc));
        }

        // Patch pass: every symbolic destination becomes an address.
        for (method, (block_pcs, exit_pc)) in self.methods.iter_mut().zip(&layouts) {
            let instrs = method
                .cfg
                .blocks
                .iter_mut()
                .flat_map(|b| b.target.iter_mut())
                .chain(method.epilogue.iter_mut());
            for instr in instrs {
                if let Some(dest) = instr.dest_mut() {
                    let address = match &dest {
                        BranchDest::Block(block) => block_pcs[block.index()],
                        BranchDest::MethodExit => *exit_pc,
                        BranchDest::Method(name) => *method_entries
                            .get(name.as_str())
                            .expect("call targets checked after compilation"),
                        BranchDest::Address(pc) => *pc,
                    };
                    *dest = BranchDest::Address(address);
                }
            }
        }

        for method in &self.methods {
            writeln!(out, "# {}{}", method.name, method.raw_descriptor)?;
            for block in &method.cfg.blocks {
                for instr in &block.target {
                    instr.write(out)?;
                }
            }
            for instr in &method.epilogue {
                instr.write(out)?;
            }
        }
        Ok(())
    }

    fn report_error(&mut self, err: Error) {
        eprintln!("Error: {}", err);
        self.error_has_occurred = true;
    }

    // A call to a method that never compiled (or does not exist) cannot be
    // patched; drop the calling method too, since each removal can orphan
    // further callers.
    fn check_call_targets(&mut self) {
        loop {
            let known: HashSet<String> =
                self.methods.iter().map(|m| m.name.clone()).collect();
            let offender = self.methods.iter().position(|m| {
                m.called_names().any(|callee| !known.contains(callee))
            });
            match offender {
                Some(index) => {
                    let method = self.methods.remove(index);
                    let missing = method
                        .called_names()
                        .find(|callee| !known.contains(*callee))
                        .unwrap_or("?")
                        .to_owned();
                    self.report_error(Error::unreachable(
                        &method.name,
                        format!("call to unknown method {}", missing),
                    ));
                }
                None => break,
            }
        }
    }
}

// Runs one method through the full pipeline.
fn compile_method(
    method: &MethodInfo,
    class: &ClassFile,
    strategy: AllocationStrategy,
    verbose: bool,
) -> Result<CompiledMethod, Error> {
    log::debug!("compiling {}{}", method.name, method.descriptor);

    let mut cfg = Cfg::build(
        &method.name,
        &method.descriptor,
        method.max_locals,
        &method.code,
        &class.constant_pool,
    )?;
    cfg.build_hir()?;
    cfg.cleanup_phi_functions();
    cfg.lower_to_lir();
    cfg.resolve_phi_functions();
    cfg.renumber_lir();
    cfg.compute_liveness();
    alloc::allocate(&mut cfg, strategy)?;
    let epilogue = generate_target(&mut cfg);

    if verbose {
        dump(&cfg);
    }

    Ok(CompiledMethod {
        name: method.name.clone(),
        raw_descriptor: method.descriptor.clone(),
        cfg,
        epilogue,
    })
}

// Maps each block's LIR onto target instructions, prepends the prologue to
// the entry block, and returns the method's epilogue.
fn generate_target(cfg: &mut Cfg) -> Vec<TargetInstruction> {
    let block_count = cfg.blocks.len();
    for index in 0..block_count {
        let mut instrs = Vec::with_capacity(cfg.blocks[index].lir.len());
        for li in 0..cfg.blocks[index].lir.len() {
            let lir = cfg.blocks[index].lir[li].clone();
            let next_block = BlockId(index as u32 + 1);
            emit_lir(cfg, &lir.kind, next_block, &mut instrs);
        }
        cfg.blocks[index].target = instrs;
    }

    // Callee-saved registers this method clobbers.
    let saves: Vec<u8> = {
        let pool: Vec<u8> = allocatable().collect();
        cfg.physical_registers_used()
            .into_iter()
            .filter(|r| pool.contains(r))
            .collect()
    };

    let mut prologue = vec![
        TargetInstruction::new(TargetKind::Push { src: RA, sp: SP }),
        TargetInstruction::new(TargetKind::Push { src: FP, sp: SP }),
        TargetInstruction::new(TargetKind::Copy { dst: FP, src: SP }),
    ];
    for save in &saves {
        prologue.push(TargetInstruction::new(TargetKind::Push {
            src: *save,
            sp: SP,
        }));
    }
    let entry = &mut cfg.blocks[0].target;
    prologue.append(entry);
    *entry = prologue;

    let mut epilogue = Vec::with_capacity(saves.len() + 3);
    for save in saves.iter().rev() {
        epilogue.push(TargetInstruction::new(TargetKind::Pop {
            dst: *save,
            sp: SP,
        }));
    }
    epilogue.push(TargetInstruction::new(TargetKind::Pop { dst: FP, sp: SP }));
    epilogue.push(TargetInstruction::new(TargetKind::Pop { dst: RA, sp: SP }));
    epilogue.push(TargetInstruction::new(TargetKind::JumpReg { reg: RA }));
    epilogue
}

fn emit_lir(
    cfg: &Cfg,
    kind: &LirKind,
    next_block: BlockId,
    out: &mut Vec<TargetInstruction>,
) {
    let phys = |reg: &RegId| phys(cfg, *reg);
    match kind {
        LirKind::IntConst { dst, value } => out.push(TargetInstruction::new(
            TargetKind::SetConst {
                dst: phys(dst),
                value: *value,
            },
        )),
        LirKind::Arithmetic { op, dst, lhs, rhs } => out.push(TargetInstruction::new(
            TargetKind::Arithmetic {
                op: *op,
                dst: phys(dst),
                lhs: phys(lhs),
                rhs: phys(rhs),
            },
        )),
        LirKind::Copy { dst, src } => out.push(TargetInstruction::new(TargetKind::Copy {
            dst: phys(dst),
            src: phys(src),
        })),
        LirKind::Load { dst, base } => out.push(TargetInstruction::new(TargetKind::Load {
            dst: phys(dst),
            base: phys(base),
        })),
        LirKind::Store { src, base } => out.push(TargetInstruction::new(TargetKind::Store {
            src: phys(src),
            base: phys(base),
        })),
        LirKind::Push { src, sp } => out.push(TargetInstruction::new(TargetKind::Push {
            src: phys(src),
            sp: phys(sp),
        })),
        LirKind::Inc { reg, value } => out.push(TargetInstruction::new(TargetKind::Inc {
            reg: phys(reg),
            value: *value,
        })),
        LirKind::Jump { target } => out.push(TargetInstruction::new(TargetKind::Jump {
            dest: BranchDest::Block(*target),
        })),
        LirKind::CondJump {
            op,
            lhs,
            rhs,
            on_true,
            on_false,
        } => {
            out.push(TargetInstruction::new(TargetKind::CondJump {
                op: *op,
                lhs: phys(lhs),
                rhs: phys(rhs),
                dest: BranchDest::Block(*on_true),
            }));
            // The false edge usually falls through to the next block; emit
            // an explicit jump only when it does not.
            if *on_false != next_block {
                out.push(TargetInstruction::new(TargetKind::Jump {
                    dest: BranchDest::Block(*on_false),
                }));
            }
        }
        LirKind::Call { name, .. } => out.push(TargetInstruction::new(TargetKind::Call {
            ra: RA,
            name: name.clone(),
            dest: BranchDest::Method(name.clone()),
        })),
        LirKind::Return { .. } => out.push(TargetInstruction::new(TargetKind::Jump {
            dest: BranchDest::MethodExit,
        })),
        LirKind::Read { dst } => {
            out.push(TargetInstruction::new(TargetKind::Read { dst: phys(dst) }))
        }
        LirKind::Write { src } => {
            out.push(TargetInstruction::new(TargetKind::Write { src: phys(src) }))
        }
    }
}

// Every register reference is physical by now: either it always was, or
// allocation assigned one (spilled values sit on their scratch register).
fn phys(cfg: &Cfg, reg: RegId) -> u8 {
    cfg.registers[reg.0 as usize]
        .as_ref()
        .and_then(|r| r.physical())
        .expect("register allocated before emission")
}

fn dump(cfg: &Cfg) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, ">>> {}{}", cfg.name, cfg.raw_descriptor);
    let _ = cfg.write_tuples(&mut out);
    let _ = cfg.write_hir(&mut out);
    let _ = cfg.write_lir(&mut out);
    let _ = cfg.write_liveness_sets(&mut out);
    let _ = cfg.write_liveness_intervals(&mut out);
}
