//! Intermediate representation for syscall filter policies
//!
//! A policy is an ordered list of rules, one per syscall, whose bodies are
//! boolean expressions over the syscall's six 64-bit arguments. Values are
//! immutable once built; the simplifier and code generator always produce
//! new trees.

use std::fmt;

use itertools::Itertools;

/// A boolean or numeric expression over syscall arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    NumericLiteral(u64),
    BooleanLiteral(bool),
    /// Reference to one of the syscall's argument slots, index 0..=5
    Argument(usize),
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    And {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Or {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Negation(Box<Expression>),
    /// Set membership (or exclusion, when `positive` is false) of `left`
    /// against a fixed candidate list
    Inclusion {
        positive: bool,
        left: Box<Expression>,
        rights: Vec<Expression>,
    },
}

impl Expression {
    pub fn comparison(op: ComparisonOp, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn negation(operand: Expression) -> Self {
        Expression::Negation(Box::new(operand))
    }

    pub fn inclusion(positive: bool, left: Expression, rights: Vec<Expression>) -> Self {
        Expression::Inclusion {
            positive,
            left: Box::new(left),
            rights,
        }
    }
}

/// Comparison operators, closed under logical negation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    /// True when `left & right` has any bit set
    BitSet,
    /// True when `left & right` has no bit set
    BitClear,
}

impl ComparisonOp {
    /// The operator that holds exactly when `self` does not
    pub fn negated(self) -> Self {
        match self {
            ComparisonOp::Eq => ComparisonOp::NotEq,
            ComparisonOp::NotEq => ComparisonOp::Eq,
            ComparisonOp::Gt => ComparisonOp::Le,
            ComparisonOp::Le => ComparisonOp::Gt,
            ComparisonOp::Ge => ComparisonOp::Lt,
            ComparisonOp::Lt => ComparisonOp::Ge,
            ComparisonOp::BitSet => ComparisonOp::BitClear,
            ComparisonOp::BitClear => ComparisonOp::BitSet,
        }
    }

    /// The operator with its operands exchanged: `a op b == b mirrored(op) a`
    pub fn mirrored(self) -> Self {
        match self {
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Ge => ComparisonOp::Le,
            ComparisonOp::Le => ComparisonOp::Ge,
            other => other,
        }
    }

    /// Standard numeric semantics, used for constant folding
    pub fn evaluate(self, left: u64, right: u64) -> bool {
        match self {
            ComparisonOp::Eq => left == right,
            ComparisonOp::NotEq => left != right,
            ComparisonOp::Gt => left > right,
            ComparisonOp::Ge => left >= right,
            ComparisonOp::Lt => left < right,
            ComparisonOp::Le => left <= right,
            ComparisonOp::BitSet => left & right != 0,
            ComparisonOp::BitClear => left & right == 0,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::NotEq => "neq",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Ge => "gte",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Le => "lte",
            ComparisonOp::BitSet => "bitset",
            ComparisonOp::BitClear => "bitclear",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::NumericLiteral(value) => write!(f, "{}", value),
            Expression::BooleanLiteral(value) => write!(f, "{}", value),
            Expression::Argument(index) => write!(f, "arg{}", index),
            Expression::Comparison { op, left, right } => {
                write!(f, "({} {} {})", op, left, right)
            }
            Expression::And { left, right } => write!(f, "(and {} {})", left, right),
            Expression::Or { left, right } => write!(f, "(or {} {})", left, right),
            Expression::Negation(operand) => write!(f, "(not {})", operand),
            Expression::Inclusion {
                positive,
                left,
                rights,
            } => {
                let tag = if *positive { "in" } else { "notin" };
                write!(f, "({} {} {})", tag, left, rights.iter().format(" "))
            }
        }
    }
}

/// A single filter rule: a syscall name and the condition under which the
/// call is allowed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub body: Expression,
}

impl Rule {
    pub fn new(name: impl Into<String>, body: Expression) -> Self {
        Rule {
            name: name.into(),
            body,
        }
    }
}

/// An ordered sequence of rules. Order determines program layout; each rule
/// is an independent match branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub rules: Vec<Rule>,
}
