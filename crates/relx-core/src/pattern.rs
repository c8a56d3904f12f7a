//! # Declarative Pattern Matching for Rules
//!
//! Each rule declares a [`Pattern`] describing the expressions it applies to. The
//! search checks the pattern before calling `apply`, so rules never see expressions
//! of the wrong shape.
//!
//! - `Pattern::Operator(matcher, children)` matches an expression whose operator kind
//!   and convention satisfy `matcher` and whose child groups match the child patterns.
//! - `Pattern::Any` matches any group.
//! - `Pattern::Leaf` matches expressions without children.
//!
//! A non-`Any` child pattern matches a group when *any* expression of the group
//! matches it; all members of a group are equivalent.

use crate::convention::Convention;
use crate::expr::OpKind;
use crate::memo::{ExprId, Memo};

#[derive(Debug, Clone)]
pub enum Pattern {
    Operator(OpMatcher, Vec<Pattern>),
    Any,
    Leaf,
}

/// Matches on operator kind and/or convention. `None` fields match anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpMatcher {
    pub kind: Option<OpKind>,
    pub convention: Option<Convention>,
}

impl OpMatcher {
    /// A logical operator of the given kind.
    pub fn logical(kind: OpKind) -> Self {
        Self {
            kind: Some(kind),
            convention: Some(Convention::NONE),
        }
    }

    /// An operator of the given kind in the given convention.
    pub fn physical(kind: OpKind, convention: Convention) -> Self {
        Self {
            kind: Some(kind),
            convention: Some(convention),
        }
    }

    /// Any operator in the given convention.
    pub fn in_convention(convention: Convention) -> Self {
        Self {
            kind: None,
            convention: Some(convention),
        }
    }
}

impl Pattern {
    /// A logical operator of `kind` whose children are unconstrained.
    pub fn logical(kind: OpKind, arity: usize) -> Self {
        Pattern::Operator(OpMatcher::logical(kind), vec![Pattern::Any; arity])
    }

    pub fn values() -> Self {
        Self::logical(OpKind::Values, 0)
    }

    pub fn scan() -> Self {
        Self::logical(OpKind::Scan, 0)
    }

    pub fn filter() -> Self {
        Self::logical(OpKind::Filter, 1)
    }

    pub fn project() -> Self {
        Self::logical(OpKind::Project, 1)
    }

    pub fn join() -> Self {
        Self::logical(OpKind::Join, 2)
    }

    pub fn sort() -> Self {
        Self::logical(OpKind::Sort, 1)
    }

    pub fn limit() -> Self {
        Self::logical(OpKind::Limit, 1)
    }

    /// Match a filter on top of a join.
    pub fn filter_join() -> Self {
        Pattern::Operator(OpMatcher::logical(OpKind::Filter), vec![Self::join()])
    }

    /// Match a filter on top of another filter.
    pub fn filter_filter() -> Self {
        Pattern::Operator(OpMatcher::logical(OpKind::Filter), vec![Self::filter()])
    }

    pub fn project_project() -> Self {
        Pattern::Operator(OpMatcher::logical(OpKind::Project), vec![Self::project()])
    }
}

/// Check if a memo expression matches a pattern.
pub fn matches(memo: &Memo, expr_id: ExprId, pattern: &Pattern) -> bool {
    let expr = memo.expr(expr_id);
    match pattern {
        Pattern::Any => true,
        Pattern::Leaf => expr.children.is_empty(),
        Pattern::Operator(matcher, child_patterns) => {
            if matcher.kind.is_some_and(|k| k != expr.op.kind()) {
                return false;
            }
            if matcher.convention.is_some_and(|c| c != expr.convention) {
                return false;
            }
            if expr.children.len() != child_patterns.len() {
                return false;
            }

            expr.children
                .iter()
                .zip(child_patterns)
                .all(|(&child, child_pattern)| match child_pattern {
                    Pattern::Any => true,
                    _ => memo
                        .group(child)
                        .exprs
                        .iter()
                        .any(|&eid| matches(memo, eid, child_pattern)),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{DataType, Expr, Field, Operator, RowType};

    #[test]
    fn test_child_pattern_matches_any_member() {
        let mut memo = Memo::new();
        let scan = memo
            .add_logical(
                Operator::Scan {
                    table: crate::expr::TableRef::new("s", "t"),
                    row_type: RowType::new(vec![Field::new("a", DataType::Int64)]),
                },
                vec![],
            )
            .unwrap();
        let inner = memo
            .add_logical(Operator::Filter { predicate: Expr::lit(true) }, vec![scan])
            .unwrap();
        let outer = memo
            .add_logical(Operator::Filter { predicate: Expr::lit(false) }, vec![inner])
            .unwrap();

        let outer_expr = memo.group(outer).exprs[0];
        let inner_expr = memo.group(inner).exprs[0];
        assert!(matches(&memo, outer_expr, &Pattern::filter_filter()));
        assert!(!matches(&memo, inner_expr, &Pattern::filter_filter()));
        assert!(!matches(&memo, outer_expr, &Pattern::join()));
        assert!(!matches(
            &memo,
            outer_expr,
            &Pattern::Operator(OpMatcher::physical(OpKind::Filter, Convention::ITERATOR), vec![Pattern::Any])
        ));
    }
}
