//! Constant folding and boolean normalization for policy expressions
//!
//! `simplify` is total and idempotent, and preserves the meaning of the
//! expression for every argument binding. After it runs, no `Negation`
//! node remains in a well-formed tree: negations fold into literals, flip
//! comparison operators, flip inclusion polarity, or distribute over the
//! connectives via De Morgan. The code generator relies on that
//! post-condition.

use crate::tree::{ComparisonOp, Expression};

/// Reduce an expression to an equivalent, simpler form
pub fn simplify(expr: Expression) -> Expression {
    match expr {
        Expression::NumericLiteral(_)
        | Expression::BooleanLiteral(_)
        | Expression::Argument(_) => expr,
        Expression::Comparison { op, left, right } => simplify_comparison(op, *left, *right),
        Expression::And { left, right } => simplify_and(*left, *right),
        Expression::Or { left, right } => simplify_or(*left, *right),
        Expression::Negation(operand) => negate(simplify(*operand)),
        Expression::Inclusion {
            positive,
            left,
            rights,
        } => simplify_inclusion(positive, *left, rights),
    }
}

fn simplify_comparison(op: ComparisonOp, left: Expression, right: Expression) -> Expression {
    let left = simplify(left);
    let right = simplify(right);
    match (numeric_value(&left), numeric_value(&right)) {
        (Some(l), Some(r)) => Expression::BooleanLiteral(op.evaluate(l, r)),
        _ => Expression::comparison(op, left, right),
    }
}

fn simplify_and(left: Expression, right: Expression) -> Expression {
    let left = simplify(left);
    let right = simplify(right);
    if matches!(left, Expression::BooleanLiteral(false))
        || matches!(right, Expression::BooleanLiteral(false))
    {
        return Expression::BooleanLiteral(false);
    }
    if matches!(left, Expression::BooleanLiteral(true)) {
        return right;
    }
    if matches!(right, Expression::BooleanLiteral(true)) {
        return left;
    }
    Expression::And {
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn simplify_or(left: Expression, right: Expression) -> Expression {
    let left = simplify(left);
    let right = simplify(right);
    if matches!(left, Expression::BooleanLiteral(true))
        || matches!(right, Expression::BooleanLiteral(true))
    {
        return Expression::BooleanLiteral(true);
    }
    if matches!(left, Expression::BooleanLiteral(false)) {
        return right;
    }
    if matches!(right, Expression::BooleanLiteral(false)) {
        return left;
    }
    Expression::Or {
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Negate an already-simplified expression, pushing the negation all the
/// way down so no `Negation` node is introduced
fn negate(expr: Expression) -> Expression {
    match expr {
        Expression::BooleanLiteral(value) => Expression::BooleanLiteral(!value),
        Expression::Comparison { op, left, right } => Expression::Comparison {
            op: op.negated(),
            left,
            right,
        },
        Expression::Inclusion {
            positive,
            left,
            rights,
        } => Expression::Inclusion {
            positive: !positive,
            left,
            rights,
        },
        Expression::And { left, right } => Expression::or(negate(*left), negate(*right)),
        Expression::Or { left, right } => Expression::and(negate(*left), negate(*right)),
        Expression::Negation(operand) => *operand,
        // Negating a numeric-valued node is not meaningful; leave the
        // wrapper so code generation reports the malformed tree.
        other => Expression::negation(other),
    }
}

fn simplify_inclusion(positive: bool, left: Expression, rights: Vec<Expression>) -> Expression {
    let left = simplify(left);
    let rights: Vec<Expression> = rights.into_iter().map(simplify).collect();

    let remaining = match numeric_value(&left) {
        Some(value) => {
            let mut remaining = Vec::with_capacity(rights.len());
            for candidate in rights {
                match numeric_value(&candidate) {
                    // Membership decided by a matching constant.
                    Some(v) if v == value => return Expression::BooleanLiteral(positive),
                    // A non-matching constant can never affect the result.
                    Some(_) => {}
                    None => remaining.push(candidate),
                }
            }
            remaining
        }
        None => rights,
    };

    if remaining.is_empty() {
        // No candidate can match, so the membership test is decided false.
        return Expression::BooleanLiteral(!positive);
    }
    Expression::Inclusion {
        positive,
        left: Box::new(left),
        rights: remaining,
    }
}

fn numeric_value(expr: &Expression) -> Option<u64> {
    match expr {
        Expression::NumericLiteral(value) => Some(*value),
        _ => None,
    }
}
