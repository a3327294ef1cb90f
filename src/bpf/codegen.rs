//! Code generation from simplified policy rules to classic BPF
//!
//! Rule bodies are compiled by structural recursion, with the instruction
//! positions of the current true and false targets passed down. Instructions
//! are emitted back to front, so every jump target already exists when the
//! jump that needs it is produced and offsets resolve in a single pass.
//! Positions are counted from the end of the program; the shared deny
//! terminal is position 1 and the shared allow terminal position 2.

use thiserror::Error;

use crate::bpf::opcodes::{
    SockFilter, BPF_ABS, BPF_JA, BPF_JEQ, BPF_JGE, BPF_JGT, BPF_JMP, BPF_JSET, BPF_K, BPF_LD,
    BPF_MISC, BPF_RET, BPF_TAX, BPF_W, BPF_X,
};
use crate::bpf::seccomp::{
    arg_word_offsets, SECCOMP_RET_ALLOW, SECCOMP_RET_KILL, SYSCALL_NR_OFFSET,
};
use crate::syscalls;
use crate::tree::{ComparisonOp, Expression, Policy, Rule};

const DENY: usize = 1;
const ALLOW: usize = 2;

pub type CodeGenResult<T> = Result<T, CodeGenError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeGenError {
    /// A boolean literal or unresolved negation reached a nested position.
    /// This is a bug in whatever produced the tree, not a bad policy.
    #[error(
        "programming error: boolean literal or negation left below the top \
         level of a rule after simplification: syscall: {rule} - {expr}"
    )]
    InvariantViolation { rule: String, expr: String },

    #[error("rule {rule} needs a jump of {offset} instructions, which does not fit in one byte")]
    JumpOffsetOverflow { rule: String, offset: usize },

    #[error("unknown syscall: {rule}")]
    UnknownSyscall { rule: String },
}

/// How the two 32-bit word tests of a 64-bit comparison combine
#[derive(Debug, Clone, Copy)]
enum WordLink {
    /// Both word tests must pass (equality and ordering family)
    Both,
    /// Either word test passing decides true (mask-test family)
    Either,
}

struct JumpSpec {
    cond: u16,
    /// Compile the positive primitive with true/false targets exchanged
    swap: bool,
    link: WordLink,
}

fn jump_spec(op: ComparisonOp) -> JumpSpec {
    let (cond, swap, link) = match op {
        ComparisonOp::Eq => (BPF_JEQ, false, WordLink::Both),
        ComparisonOp::NotEq => (BPF_JEQ, true, WordLink::Both),
        ComparisonOp::Gt => (BPF_JGT, false, WordLink::Both),
        ComparisonOp::Ge => (BPF_JGE, false, WordLink::Both),
        ComparisonOp::Lt => (BPF_JGE, true, WordLink::Both),
        ComparisonOp::Le => (BPF_JGT, true, WordLink::Both),
        ComparisonOp::BitSet => (BPF_JSET, false, WordLink::Either),
        ComparisonOp::BitClear => (BPF_JSET, true, WordLink::Either),
    };
    JumpSpec { cond, swap, link }
}

fn load_abs(k: u32) -> SockFilter {
    SockFilter {
        code: BPF_LD | BPF_W | BPF_ABS,
        jt: 0,
        jf: 0,
        k,
    }
}

fn transfer_a_to_x() -> SockFilter {
    SockFilter {
        code: BPF_MISC | BPF_TAX,
        jt: 0,
        jf: 0,
        k: 0,
    }
}

fn return_constant(k: u32) -> SockFilter {
    SockFilter {
        code: BPF_RET | BPF_K,
        jt: 0,
        jf: 0,
        k,
    }
}

/// Classic BPF code generator for syscall filter policies
pub struct BpfCodeGen {
    /// Program under construction, back to front
    insns: Vec<SockFilter>,
    deny_return: u32,
}

impl BpfCodeGen {
    pub fn new() -> Self {
        Self {
            insns: Vec::new(),
            deny_return: SECCOMP_RET_KILL,
        }
    }

    /// Use a different filter return value for the shared deny terminal,
    /// e.g. `SECCOMP_RET_ERRNO | libc::EPERM`
    pub fn with_deny_return(mut self, value: u32) -> Self {
        self.deny_return = value;
        self
    }

    /// Generate a complete filter program. Rule bodies must already be
    /// simplified; stray boolean literals or negations are reported as
    /// invariant violations.
    pub fn generate(&mut self, policy: &Policy) -> CodeGenResult<Vec<SockFilter>> {
        self.insns.clear();
        self.insns.push(return_constant(self.deny_return));
        self.insns.push(return_constant(SECCOMP_RET_ALLOW));

        let mut next_rule = DENY;
        for rule in policy.rules.iter().rev() {
            next_rule = self.compile_rule(rule, next_rule)?;
        }

        let mut program = self.insns.clone();
        program.reverse();
        Ok(program)
    }

    /// Compile one rule and return the position of its first instruction,
    /// which becomes the fall-through target of the rule before it
    fn compile_rule(&mut self, rule: &Rule, next_rule: usize) -> CodeGenResult<usize> {
        let number = syscalls::lookup(&rule.name).ok_or_else(|| CodeGenError::UnknownSyscall {
            rule: rule.name.clone(),
        })?;

        match &rule.body {
            // A constant body bypasses the condition chain entirely.
            Expression::BooleanLiteral(value) => {
                let target = if *value { ALLOW } else { DENY };
                let k = (self.insns.len() - target) as u32;
                self.insns.push(SockFilter {
                    code: BPF_JMP | BPF_JA,
                    jt: 0,
                    jf: 0,
                    k,
                });
            }
            body => self.compile_expr(rule, body, ALLOW, next_rule)?,
        }

        let body_start = self.insns.len();
        self.emit_jump(rule, BPF_JMP | BPF_JEQ | BPF_K, body_start, next_rule, number)?;
        self.insns.push(load_abs(SYSCALL_NR_OFFSET));
        Ok(self.insns.len())
    }

    fn compile_expr(
        &mut self,
        rule: &Rule,
        expr: &Expression,
        t: usize,
        f: usize,
    ) -> CodeGenResult<()> {
        match expr {
            Expression::And { left, right } => {
                self.compile_expr(rule, right, t, f)?;
                let right_start = self.insns.len();
                self.compile_expr(rule, left, right_start, f)
            }
            Expression::Or { left, right } => {
                self.compile_expr(rule, right, t, f)?;
                let right_start = self.insns.len();
                self.compile_expr(rule, left, t, right_start)
            }
            Expression::Comparison { op, left, right } => {
                self.compile_comparison(rule, *op, left, right, t, f)
            }
            Expression::Inclusion {
                positive,
                left,
                rights,
            } => self.compile_inclusion(rule, *positive, left, rights, t, f),
            Expression::BooleanLiteral(_)
            | Expression::Negation(_)
            | Expression::NumericLiteral(_)
            | Expression::Argument(_) => Err(self.invariant_violation(rule)),
        }
    }

    fn compile_comparison(
        &mut self,
        rule: &Rule,
        op: ComparisonOp,
        left: &Expression,
        right: &Expression,
        t: usize,
        f: usize,
    ) -> CodeGenResult<()> {
        match (left, right) {
            (Expression::Argument(index), Expression::NumericLiteral(value)) => {
                self.compile_argument_constant(rule, op, *index, *value, t, f)
            }
            (Expression::NumericLiteral(value), Expression::Argument(index)) => {
                self.compile_argument_constant(rule, op.mirrored(), *index, *value, t, f)
            }
            (Expression::Argument(left), Expression::Argument(right)) => {
                self.compile_argument_argument(rule, op, *left, *right, t, f)
            }
            _ => Err(self.invariant_violation(rule)),
        }
    }

    /// Argument against a 64-bit literal: one word test per 32-bit half
    fn compile_argument_constant(
        &mut self,
        rule: &Rule,
        op: ComparisonOp,
        index: usize,
        value: u64,
        t: usize,
        f: usize,
    ) -> CodeGenResult<()> {
        let spec = jump_spec(op);
        let (t, f) = if spec.swap { (f, t) } else { (t, f) };
        let (upper_off, lower_off) = arg_word_offsets(index);
        let upper = (value >> 32) as u32;
        let lower = value as u32;

        self.emit_jump(rule, BPF_JMP | spec.cond | BPF_K, t, f, lower)?;
        self.insns.push(load_abs(lower_off));
        let lower_test = self.insns.len();
        match spec.link {
            WordLink::Both => {
                self.emit_jump(rule, BPF_JMP | spec.cond | BPF_K, lower_test, f, upper)?
            }
            WordLink::Either => {
                self.emit_jump(rule, BPF_JMP | spec.cond | BPF_K, t, lower_test, upper)?
            }
        }
        self.insns.push(load_abs(upper_off));
        Ok(())
    }

    /// Argument against argument: per word, load the right side, move it
    /// to X, load the left side, then compare with the register form
    fn compile_argument_argument(
        &mut self,
        rule: &Rule,
        op: ComparisonOp,
        left: usize,
        right: usize,
        t: usize,
        f: usize,
    ) -> CodeGenResult<()> {
        let spec = jump_spec(op);
        let (t, f) = if spec.swap { (f, t) } else { (t, f) };
        let (left_upper, left_lower) = arg_word_offsets(left);
        let (right_upper, right_lower) = arg_word_offsets(right);

        self.emit_jump(rule, BPF_JMP | spec.cond | BPF_X, t, f, 0)?;
        self.insns.push(load_abs(left_lower));
        self.insns.push(transfer_a_to_x());
        self.insns.push(load_abs(right_lower));
        let lower_test = self.insns.len();
        match spec.link {
            WordLink::Both => self.emit_jump(rule, BPF_JMP | spec.cond | BPF_X, lower_test, f, 0)?,
            WordLink::Either => self.emit_jump(rule, BPF_JMP | spec.cond | BPF_X, t, lower_test, 0)?,
        }
        self.insns.push(load_abs(left_upper));
        self.insns.push(transfer_a_to_x());
        self.insns.push(load_abs(right_upper));
        Ok(())
    }

    /// Inclusion desugars to the equivalent chain of equality tests and
    /// reuses the connective machinery
    fn compile_inclusion(
        &mut self,
        rule: &Rule,
        positive: bool,
        left: &Expression,
        rights: &[Expression],
        t: usize,
        f: usize,
    ) -> CodeGenResult<()> {
        let op = if positive {
            ComparisonOp::Eq
        } else {
            ComparisonOp::NotEq
        };
        let test = |candidate: &Expression| {
            Expression::comparison(op, left.clone(), candidate.clone())
        };

        let mut candidates = rights.iter().rev();
        let last = match candidates.next() {
            Some(candidate) => candidate,
            // The simplifier decides empty candidate lists.
            None => return Err(self.invariant_violation(rule)),
        };
        let chain = candidates.fold(test(last), |chain, candidate| {
            if positive {
                Expression::or(test(candidate), chain)
            } else {
                Expression::and(test(candidate), chain)
            }
        });
        self.compile_expr(rule, &chain, t, f)
    }

    fn emit_jump(
        &mut self,
        rule: &Rule,
        code: u16,
        t: usize,
        f: usize,
        k: u32,
    ) -> CodeGenResult<()> {
        let position = self.insns.len();
        let jt = self.offset_to(rule, position, t)?;
        let jf = self.offset_to(rule, position, f)?;
        self.insns.push(SockFilter { code, jt, jf, k });
        Ok(())
    }

    /// Distance from an instruction emitted at `position` to a target
    /// already in the buffer. Targets always sit toward the end of the
    /// program, so the offset is never negative.
    fn offset_to(&self, rule: &Rule, position: usize, target: usize) -> CodeGenResult<u8> {
        let offset = position - target;
        u8::try_from(offset).map_err(|_| CodeGenError::JumpOffsetOverflow {
            rule: rule.name.clone(),
            offset,
        })
    }

    fn invariant_violation(&self, rule: &Rule) -> CodeGenError {
        CodeGenError::InvariantViolation {
            rule: rule.name.clone(),
            expr: rule.body.to_string(),
        }
    }
}

impl Default for BpfCodeGen {
    fn default() -> Self {
        Self::new()
    }
}
