//! Main compiler orchestration

use thiserror::Error;

use crate::bpf::asm::{self, AsmError};
use crate::bpf::codegen::{BpfCodeGen, CodeGenError};
use crate::bpf::opcodes::{encode, SockFilter};
use crate::bpf::seccomp::SECCOMP_RET_KILL;
use crate::simplify::simplify;
use crate::tree::{Policy, Rule};

pub type CompilerResult<T> = Result<T, CompilerError>;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("code generation error: {0}")]
    CodeGen(#[from] CodeGenError),

    #[error("assembler error: {0}")]
    Asm(#[from] AsmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Syscall filter policy to classic BPF compiler
pub struct Compiler {
    /// Filter return value for the shared deny terminal
    deny_return: u32,
}

impl Compiler {
    /// Create a new compiler with default settings (denied syscalls kill
    /// the calling thread)
    pub fn new() -> Self {
        Self {
            deny_return: SECCOMP_RET_KILL,
        }
    }

    /// Use a different filter return value for denied syscalls
    pub fn with_deny_return(mut self, value: u32) -> Self {
        self.deny_return = value;
        self
    }

    /// Compile a policy into a filter program: simplify each rule body,
    /// then generate linked instructions
    pub fn compile(&self, policy: &Policy) -> CompilerResult<Vec<SockFilter>> {
        let simplified = Policy {
            rules: policy
                .rules
                .iter()
                .map(|rule| {
                    let body = simplify(rule.body.clone());
                    log::debug!("rule {}: {}", rule.name, body);
                    Rule {
                        name: rule.name.clone(),
                        body,
                    }
                })
                .collect(),
        };

        let mut codegen = BpfCodeGen::new().with_deny_return(self.deny_return);
        let program = codegen.generate(&simplified)?;
        log::debug!(
            "compiled {} rules into {} instructions",
            policy.rules.len(),
            program.len()
        );
        Ok(program)
    }

    /// Compile to the byte layout consumed by the kernel's filter
    /// installation interface
    pub fn compile_to_bytes(&self, policy: &Policy) -> CompilerResult<Vec<u8>> {
        Ok(encode(&self.compile(policy)?))
    }

    /// Compile to the assembler text form, for inspection and golden tests
    pub fn compile_to_asm(&self, policy: &Policy) -> CompilerResult<String> {
        Ok(asm::disassemble(&self.compile(policy)?)?)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ComparisonOp::*;
    use crate::tree::Expression::{self, *};
    use pretty_assertions::assert_eq;

    fn arg_eq(index: usize, value: u64) -> Expression {
        Expression::comparison(Eq, Argument(index), NumericLiteral(value))
    }

    fn single_rule(name: &str, body: Expression) -> Policy {
        Policy {
            rules: vec![Rule::new(name, body)],
        }
    }

    #[test]
    fn test_compiler_creation() {
        let compiler = Compiler::new();
        assert_eq!(compiler.deny_return, SECCOMP_RET_KILL);

        let compiler = Compiler::new().with_deny_return(0x0005_0001);
        assert_eq!(compiler.deny_return, 0x0005_0001);
    }

    #[test]
    fn test_or_between_argument_tests_reaches_shared_terminals() {
        let policy = single_rule("write", Expression::or(arg_eq(0, 42), arg_eq(1, 42)));
        assert_eq!(
            Compiler::new().compile_to_asm(&policy).unwrap(),
            "ld_abs\t0\n\
             jeq_k\t00\t09\t1\n\
             ld_abs\t10\n\
             jeq_k\t00\t02\t0\n\
             ld_abs\t14\n\
             jeq_k\t04\t00\t2A\n\
             ld_abs\t18\n\
             jeq_k\t00\t03\t0\n\
             ld_abs\t1C\n\
             jeq_k\t00\t01\t2A\n\
             ret_k\t7FFF0000\n\
             ret_k\t0\n"
        );
    }

    #[test]
    fn test_negated_and_expression() {
        let policy = single_rule(
            "write",
            Expression::negation(Expression::and(arg_eq(0, 42), arg_eq(1, 42))),
        );
        assert_eq!(
            Compiler::new().compile_to_asm(&policy).unwrap(),
            "ld_abs\t0\n\
             jeq_k\t00\t09\t1\n\
             ld_abs\t10\n\
             jeq_k\t00\t06\t0\n\
             ld_abs\t14\n\
             jeq_k\t00\t04\t2A\n\
             ld_abs\t18\n\
             jeq_k\t00\t02\t0\n\
             ld_abs\t1C\n\
             jeq_k\t01\t00\t2A\n\
             ret_k\t7FFF0000\n\
             ret_k\t0\n"
        );
    }

    #[test]
    fn test_negated_or_expression() {
        let policy = single_rule(
            "write",
            Expression::negation(Expression::or(arg_eq(0, 42), arg_eq(1, 42))),
        );
        assert_eq!(
            Compiler::new().compile_to_asm(&policy).unwrap(),
            "ld_abs\t0\n\
             jeq_k\t00\t09\t1\n\
             ld_abs\t10\n\
             jeq_k\t00\t02\t0\n\
             ld_abs\t14\n\
             jeq_k\t05\t00\t2A\n\
             ld_abs\t18\n\
             jeq_k\t00\t02\t0\n\
             ld_abs\t1C\n\
             jeq_k\t01\t00\t2A\n\
             ret_k\t7FFF0000\n\
             ret_k\t0\n"
        );
    }

    #[test]
    fn test_negated_equality_comparison() {
        let policy = single_rule("write", Expression::negation(arg_eq(0, 42)));
        assert_eq!(
            Compiler::new().compile_to_asm(&policy).unwrap(),
            "ld_abs\t0\n\
             jeq_k\t00\t05\t1\n\
             ld_abs\t10\n\
             jeq_k\t00\t02\t0\n\
             ld_abs\t14\n\
             jeq_k\t01\t00\t2A\n\
             ret_k\t7FFF0000\n\
             ret_k\t0\n"
        );
    }

    #[test]
    fn test_negation_on_either_side_of_and() {
        let right_negated = single_rule(
            "write",
            Expression::and(arg_eq(0, 42), Expression::negation(arg_eq(1, 42))),
        );
        assert_eq!(
            Compiler::new().compile_to_asm(&right_negated).unwrap(),
            "ld_abs\t0\n\
             jeq_k\t00\t09\t1\n\
             ld_abs\t10\n\
             jeq_k\t00\t07\t0\n\
             ld_abs\t14\n\
             jeq_k\t00\t05\t2A\n\
             ld_abs\t18\n\
             jeq_k\t00\t02\t0\n\
             ld_abs\t1C\n\
             jeq_k\t01\t00\t2A\n\
             ret_k\t7FFF0000\n\
             ret_k\t0\n"
        );

        let left_negated = single_rule(
            "write",
            Expression::and(Expression::negation(arg_eq(0, 42)), arg_eq(1, 42)),
        );
        assert_eq!(
            Compiler::new().compile_to_asm(&left_negated).unwrap(),
            "ld_abs\t0\n\
             jeq_k\t00\t09\t1\n\
             ld_abs\t10\n\
             jeq_k\t00\t02\t0\n\
             ld_abs\t14\n\
             jeq_k\t05\t00\t2A\n\
             ld_abs\t18\n\
             jeq_k\t00\t03\t0\n\
             ld_abs\t1C\n\
             jeq_k\t00\t01\t2A\n\
             ret_k\t7FFF0000\n\
             ret_k\t0\n"
        );
    }

    #[test]
    fn test_negated_conjunction_equals_disjunction_of_negations() {
        let a = arg_eq(0, 42);
        let b = Expression::comparison(Gt, Argument(1), NumericLiteral(7));
        let negated = single_rule(
            "write",
            Expression::negation(Expression::and(a.clone(), b.clone())),
        );
        let expanded = single_rule(
            "write",
            Expression::or(Expression::negation(a), Expression::negation(b)),
        );
        let compiler = Compiler::new();
        assert_eq!(
            compiler.compile(&negated).unwrap(),
            compiler.compile(&expanded).unwrap()
        );
    }

    #[test]
    fn test_constant_body_folds_to_unconditional_jump() {
        let policy = single_rule(
            "write",
            Expression::comparison(Eq, NumericLiteral(1), NumericLiteral(1)),
        );
        assert_eq!(
            Compiler::new().compile_to_asm(&policy).unwrap(),
            "ld_abs\t0\n\
             jeq_k\t00\t02\t1\n\
             ja\t0\n\
             ret_k\t7FFF0000\n\
             ret_k\t0\n"
        );
    }

    #[test]
    fn test_generated_programs_round_trip_through_the_assembler() {
        let policy = Policy {
            rules: vec![
                Rule::new(
                    "write",
                    Expression::or(
                        arg_eq(0, 42),
                        Expression::negation(Expression::inclusion(
                            true,
                            Argument(1),
                            vec![NumericLiteral(1), NumericLiteral(2)],
                        )),
                    ),
                ),
                Rule::new("read", Expression::comparison(Le, Argument(0), Argument(1))),
            ],
        };
        let program = Compiler::new().compile(&policy).unwrap();
        let text = asm::disassemble(&program).unwrap();
        assert_eq!(asm::assemble(&text).unwrap(), program);
    }

    #[test]
    fn test_deny_return_flows_through_to_the_terminal() {
        let policy = single_rule("write", arg_eq(0, 1));
        let program = Compiler::new()
            .with_deny_return(0x0005_0001)
            .compile(&policy)
            .unwrap();
        assert_eq!(program.last().unwrap().k, 0x0005_0001);
    }
}
