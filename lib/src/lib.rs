//! Compile class-file bytecode for a small integer-only language into
//! assembly for a 16-register target machine.
//!
//! The pipeline runs once per method, each stage rewriting the previous
//! representation in place on the method's [`cfg::Cfg`]:
//!
//! 1. bytecode bytes decode into a tuple stream ([`cfg`]),
//! 2. tuples split into basic blocks linked into a control-flow graph with
//!    loop detection,
//! 3. symbolic execution of the operand stack builds an SSA-form HIR with
//!    φ-functions ([`hir`]),
//! 4. HIR lowers to a register-based LIR with explicit loads, stores and
//!    call plumbing ([`lir`]),
//! 5. liveness analysis computes per-block sets and per-register intervals
//!    ([`liveness`]),
//! 6. an allocator (naive or interference-graph coloring) maps virtual
//!    registers onto the machine's sixteen, spilling what does not fit
//!    ([`alloc`]),
//! 7. the emitter produces target instructions, wraps methods in
//!    prologue/epilogue, resolves jump addresses and writes the assembly
//!    text ([`target`]).
//!
//! ```no_run
//! use class2reg::alloc::AllocationStrategy;
//! use class2reg::classfile::reader;
//! use class2reg::target::Emitter;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), class2reg::Error> {
//! let path = Path::new("Factorial.class");
//! let class = reader::read_class_file(path)?;
//! let mut emitter = Emitter::new(path, &class, AllocationStrategy::Graph, false);
//! emitter.write(Path::new("."))?;
//! std::process::exit(if emitter.error_has_occurred() { 1 } else { 0 });
//! # }
//! ```

pub mod alloc;
pub mod cfg;
pub mod classfile;
mod errors;
pub mod hir;
pub mod lir;
pub mod liveness;
pub mod regs;
pub mod target;

pub use errors::Error;
