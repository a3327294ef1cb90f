//! Classic BPF target: instruction layout, seccomp ABI, code generation,
//! and the textual assembler

pub mod asm;
pub mod codegen;
pub mod opcodes;
pub mod seccomp;

pub use codegen::BpfCodeGen;
