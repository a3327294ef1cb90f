//! Basic usage example of the syscall policy compiler

use seccomp_policy_compiler::bpf::seccomp::SECCOMP_RET_ERRNO;
use seccomp_policy_compiler::tree::{ComparisonOp, Expression, Policy, Rule};
use seccomp_policy_compiler::{Compiler, CompilerResult};

fn main() -> CompilerResult<()> {
    // write is allowed only on stdout or stderr; read is always allowed.
    let policy = Policy {
        rules: vec![
            Rule::new(
                "write",
                Expression::inclusion(
                    true,
                    Expression::Argument(0),
                    vec![
                        Expression::NumericLiteral(1),
                        Expression::NumericLiteral(2),
                    ],
                ),
            ),
            Rule::new("read", Expression::BooleanLiteral(true)),
            Rule::new(
                "mmap",
                Expression::negation(Expression::comparison(
                    ComparisonOp::Gt,
                    Expression::Argument(1),
                    Expression::NumericLiteral(0x100000),
                )),
            ),
        ],
    };

    let compiler = Compiler::new();
    let program = compiler.compile(&policy)?;
    println!("Compiled {} instructions:", program.len());
    print!("{}", compiler.compile_to_asm(&policy)?);

    // The byte form is what gets handed to the kernel.
    let bytes = compiler.compile_to_bytes(&policy)?;
    println!("Binary filter is {} bytes", bytes.len());

    // Denials can fail the call with an errno instead of killing.
    let eperm = Compiler::new().with_deny_return(SECCOMP_RET_ERRNO | 1);
    let bytes = eperm.compile_to_bytes(&policy)?;
    println!("EPERM variant is {} bytes", bytes.len());

    Ok(())
}
