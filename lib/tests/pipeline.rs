//! End-to-end scenarios: source-shaped programs in, assembly text out.

mod common;

use class2reg::alloc::{self, AllocationStrategy};
use class2reg::cfg::Cfg;
use class2reg::classfile::ClassFile;
use class2reg::hir::HirKind;
use class2reg::lir::LirKind;
use class2reg::target::Emitter;
use common::{io_refs, Asm, ClassBuilder};
use std::path::Path;

fn compile_cfg(class: &ClassFile, index: usize, strategy: AllocationStrategy) -> Cfg {
    let method = &class.methods[index];
    let mut cfg = Cfg::build(
        &method.name,
        &method.descriptor,
        method.max_locals,
        &method.code,
        &class.constant_pool,
    )
    .unwrap();
    cfg.build_hir().unwrap();
    cfg.cleanup_phi_functions();
    cfg.lower_to_lir();
    cfg.resolve_phi_functions();
    cfg.renumber_lir();
    cfg.compute_liveness();
    alloc::allocate(&mut cfg, strategy).unwrap();
    cfg
}

fn emit_text(class: &ClassFile) -> String {
    let mut emitter = Emitter::new(
        Path::new("Test.iota"),
        class,
        AllocationStrategy::Graph,
        false,
    );
    assert!(!emitter.error_has_occurred());
    let mut buffer = Vec::new();
    emitter.write_to(&mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// int fact(int n) { int r = 1; for (int i = 2; i <= n; i++) r = r * i; return r; }
fn factorial_class() -> ClassFile {
    let mut builder = ClassBuilder::new();
    let two = builder.integer(2);
    let mut asm = Asm::new();
    asm.iconst_1()
        .istore(1)
        .ldc(two)
        .istore(2)
        .label("loop")
        .iload(2)
        .iload(0)
        .if_icmpgt("end")
        .iload(1)
        .iload(2)
        .imul()
        .istore(1)
        .iload(2)
        .iconst_1()
        .iadd()
        .istore(2)
        .goto("loop")
        .label("end")
        .iload(1)
        .ireturn();
    builder.add_method("fact", "(I)I", 3, asm.finish());
    builder.build()
}

#[test]
fn factorial_loop_carries_two_phis_and_no_parameter_phi() {
    let class = factorial_class();
    let cfg = compile_cfg(&class, 0, AllocationStrategy::Graph);

    let head = cfg
        .blocks
        .iter()
        .find(|b| b.is_loop_head)
        .expect("loop head");
    let phi_indices: Vec<usize> = head
        .hir
        .iter()
        .filter_map(|h| match &cfg.hir[h.index()].kind {
            HirKind::Phi { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    // r (local 1) and i (local 2) survive; the parameter φ (local 0) folds.
    assert_eq!(phi_indices, vec![1, 2]);
    assert!(cfg.blocks.iter().any(|b| b.is_loop_tail));
}

#[test]
fn factorial_text_has_one_prologue_one_back_edge_and_a_terminal_return() {
    let class = factorial_class();
    let text = emit_text(&class);
    let lines: Vec<&str> = text.lines().collect();

    let col = |line: &str, n: usize| -> String {
        line.split_whitespace().nth(n).unwrap_or("").to_owned()
    };

    let pushr_ra = lines
        .iter()
        .filter(|l| col(l, 1) == "pushr" && col(l, 2) == "r14")
        .count();
    let pushr_fp = lines
        .iter()
        .filter(|l| col(l, 1) == "pushr" && col(l, 2) == "r12")
        .count();
    let copy_fp_sp = lines
        .iter()
        .filter(|l| col(l, 1) == "copy" && col(l, 2) == "r12" && col(l, 3) == "r15")
        .count();
    assert_eq!((pushr_ra, pushr_fp, copy_fp_sp), (1, 1, 1));

    // At least one resolved jump going backwards (the loop's back edge).
    let back_edge = lines.iter().any(|l| {
        col(l, 1) == "jumpr"
            && col(l, 2).parse::<usize>().map_or(false, |target| {
                col(l, 0).parse::<usize>().map_or(false, |pc| target < pc)
            })
    });
    assert!(back_edge, "no back-edge jump in:\n{}", text);

    // Epilogue: popr r14 immediately before the final jumpr r14.
    let last = lines[lines.len() - 1];
    let second_last = lines[lines.len() - 2];
    assert_eq!(col(last, 1), "jumpr");
    assert_eq!(col(last, 2), "r14");
    assert_eq!(col(second_last, 1), "popr");
    assert_eq!(col(second_last, 2), "r14");
}

// void main() { write(read()); }
#[test]
fn echo_uses_io_instructions_without_call_plumbing() {
    let mut builder = ClassBuilder::new();
    let (read, write) = io_refs(&mut builder);
    let mut asm = Asm::new();
    asm.invokestatic(read).invokestatic(write).vreturn();
    builder.add_method("main", "()V", 0, asm.finish());
    let class = builder.build();
    let text = emit_text(&class);

    let col = |line: &str, n: usize| -> String {
        line.split_whitespace().nth(n).unwrap_or("").to_owned()
    };
    let reads: Vec<&str> = text.lines().filter(|l| col(l, 1) == "read").collect();
    let writes: Vec<&str> = text.lines().filter(|l| col(l, 1) == "write").collect();
    assert_eq!(reads.len(), 1);
    assert_eq!(writes.len(), 1);
    // write consumes exactly the register read produced.
    assert_eq!(col(reads[0], 2), col(writes[0], 2));

    assert!(!text.contains("calln"));
    // No argument traffic: every push belongs to the prologue (before the
    // read) and every pop to the epilogue (after the write).
    let read_at = text.lines().position(|l| col(l, 1) == "read").unwrap();
    let write_at = text.lines().position(|l| col(l, 1) == "write").unwrap();
    for (i, line) in text.lines().enumerate() {
        if col(line, 1) == "pushr" {
            assert!(i < read_at, "argument push for an IO call: {}", line);
        }
        if col(line, 1) == "popr" {
            assert!(i > write_at, "argument pop for an IO call: {}", line);
        }
    }
}

// int add(int a, int b) { return a + b; }  called from main.
#[test]
fn add_pair_call_site_and_callee_frame() {
    let mut builder = ClassBuilder::new();
    let add_ref = builder.method_ref("add", "(II)I");

    let mut main = Asm::new();
    main.iconst_0().iconst_1().invokestatic(add_ref).ireturn();
    builder.add_method("main", "()I", 0, main.finish());

    let mut add = Asm::new();
    add.iload(0).iload(1).iadd().ireturn();
    builder.add_method("add", "(II)I", 2, add.finish());

    let class = builder.build();
    let text = emit_text(&class);
    let col = |line: &str, n: usize| -> String {
        line.split_whitespace().nth(n).unwrap_or("").to_owned()
    };

    // The callee's header, and the pc of its first instruction.
    let lines: Vec<&str> = text.lines().collect();
    let header_at = lines.iter().position(|l| *l == "# add(II)I").unwrap();
    let add_entry: usize = col(lines[header_at + 1], 0).parse().unwrap();

    // Call site: two argument pushes, then calln patched to the callee,
    // then the stack reclaim and the result copy out of RV.
    let main_lines = &lines[..header_at];
    let calln_at = main_lines
        .iter()
        .position(|l| col(l, 1) == "calln")
        .expect("calln in main");
    assert_eq!(col(main_lines[calln_at], 2), "r14");
    assert_eq!(col(main_lines[calln_at], 3), add_entry.to_string());
    assert_eq!(col(main_lines[calln_at - 1], 1), "pushr");
    assert_eq!(col(main_lines[calln_at - 2], 1), "pushr");
    assert!(main_lines[calln_at..]
        .iter()
        .any(|l| col(l, 1) == "addn" && col(l, 2) == "r15" && col(l, 3) == "-2"));
    assert!(main_lines[calln_at..]
        .iter()
        .any(|l| col(l, 1) == "copy" && col(l, 3) == "r13"));

    // Callee: parameters 0 and 1 load through FP at offsets -3 and -4.
    let add_lines = &lines[header_at..];
    assert!(add_lines
        .iter()
        .any(|l| col(l, 1) == "addn" && col(l, 2) == "r11" && col(l, 3) == "-3"));
    assert!(add_lines
        .iter()
        .any(|l| col(l, 1) == "addn" && col(l, 2) == "r11" && col(l, 3) == "-4"));
    assert!(add_lines.iter().any(|l| col(l, 1) == "loadn"));
}

// Thirty simultaneously-live values against a ten-register pool.
#[test]
fn spiller_spills_with_distinct_offsets_and_adjacent_traffic() {
    let mut builder = ClassBuilder::new();
    let mut asm = Asm::new();
    for _ in 0..30 {
        asm.iconst_1();
    }
    for _ in 0..29 {
        asm.iadd();
    }
    asm.ireturn();
    builder.add_method("wide", "()I", 0, asm.finish());
    let class = builder.build();
    let cfg = compile_cfg(&class, 0, AllocationStrategy::Graph);

    let spilled: Vec<i32> = cfg
        .registers
        .iter()
        .flatten()
        .filter_map(|r| r.as_virtual())
        .filter(|v| v.spill)
        .map(|v| v.offset.unwrap())
        .collect();
    assert!(spilled.len() >= 17, "only {} spills", spilled.len());
    let mut offsets = spilled.clone();
    offsets.sort_unstable();
    offsets.dedup();
    assert_eq!(offsets.len(), spilled.len());

    // Load/store inserts sit adjacent to every rewritten use.
    for block in &cfg.blocks {
        for (i, lir) in block.lir.iter().enumerate() {
            match lir.kind {
                LirKind::Store { .. } => {
                    assert!(matches!(block.lir[i - 1].kind, LirKind::Inc { .. }));
                    assert!(matches!(block.lir[i - 2].kind, LirKind::Copy { .. }));
                }
                LirKind::Load { base, .. } if i >= 1 => {
                    // Reloads follow their address computation.
                    if matches!(block.lir[i - 1].kind, LirKind::Inc { reg, .. } if reg == base) {
                        assert!(matches!(block.lir[i - 2].kind, LirKind::Copy { .. }));
                    }
                }
                _ => {}
            }
        }
    }
}

// A jump over a block nothing targets: the block disappears entirely.
#[test]
fn dead_branch_block_is_dropped_from_graph_and_output() {
    let mut builder = ClassBuilder::new();
    let mut asm = Asm::new();
    asm.goto("live")
        .iconst_0()
        .pop()
        .label("live")
        .vreturn();
    builder.add_method("main", "()V", 0, asm.finish());
    let class = builder.build();

    let cfg = compile_cfg(&class, 0, AllocationStrategy::Graph);
    let tuples: usize = cfg.blocks.iter().map(|b| b.tuples.len()).sum();
    assert_eq!(tuples, 2); // the goto and the return
    for block in &cfg.blocks {
        for pred in &block.predecessors {
            assert!((pred.index()) < cfg.blocks.len());
        }
    }

    let text = emit_text(&class);
    assert!(!text.contains("set0"), "dead constant emitted:\n{}", text);
}

// int f(int x) { return -x; }
#[test]
fn negation_emits_setn_minus_one_and_mul() {
    let mut builder = ClassBuilder::new();
    let mut asm = Asm::new();
    asm.iload(0).ineg().ireturn();
    builder.add_method("f", "(I)I", 1, asm.finish());
    let class = builder.build();
    let text = emit_text(&class);

    let col = |line: &str, n: usize| -> String {
        line.split_whitespace().nth(n).unwrap_or("").to_owned()
    };
    assert!(text
        .lines()
        .any(|l| col(l, 1) == "setn" && col(l, 3) == "-1"));
    assert!(text.lines().any(|l| col(l, 1) == "mul"));
}
