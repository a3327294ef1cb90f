//! Syscall Policy Compiler
//!
//! Compiles declarative syscall-filtering policies to classic BPF programs
//! for the kernel's seccomp facility.

pub mod bpf;
pub mod compiler;
pub mod simplify;
pub mod syscalls;
pub mod tree;

pub use compiler::{Compiler, CompilerError, CompilerResult};
