//! # Compiled Implementation Rules
//!
//! Operators that can run inside generated code. The `COMPILED` convention works on
//! positional rows, `COMPILED_RECORD` on named records; both push one row at a time
//! through the statements spliced into an enclosing loop.
//!
//! - Filter and Project are implemented in both conventions and require their input
//!   in the same convention.
//! - Inner joins are implemented in `COMPILED` only: the left input drives the loop
//!   in generated code and the right input is re-opened as an `ITERATOR` cursor for
//!   every left row. Requiring `ITERATOR` of the right side is what makes the
//!   planner insert a converter there when the right side is compiled.
//!
//! Leaves are never compiled; rows enter generated code through a converter from
//! `ITERATOR`.

use relx_core::convention::Convention;
use relx_core::expr::*;
use relx_core::memo::{Memo, MemoExpr};
use relx_core::pattern::Pattern;
use relx_core::rule::{OptContext, Rule, RuleResult, RuleType};

pub struct ImplCompiledRule {
    kind: OpKind,
    convention: Convention,
    name: &'static str,
}

impl ImplCompiledRule {
    pub fn filter() -> Self {
        Self {
            kind: OpKind::Filter,
            convention: Convention::COMPILED,
            name: "ImplCompiledFilter",
        }
    }

    pub fn project() -> Self {
        Self {
            kind: OpKind::Project,
            convention: Convention::COMPILED,
            name: "ImplCompiledProject",
        }
    }

    pub fn join() -> Self {
        Self {
            kind: OpKind::Join,
            convention: Convention::COMPILED,
            name: "ImplCompiledJoin",
        }
    }

    pub fn record_filter() -> Self {
        Self {
            kind: OpKind::Filter,
            convention: Convention::COMPILED_RECORD,
            name: "ImplRecordFilter",
        }
    }

    pub fn record_project() -> Self {
        Self {
            kind: OpKind::Project,
            convention: Convention::COMPILED_RECORD,
            name: "ImplRecordProject",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::filter(),
            Self::project(),
            Self::join(),
            Self::record_filter(),
            Self::record_project(),
        ]
    }
}

impl Rule for ImplCompiledRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(self.kind, if self.kind == OpKind::Join { 2 } else { 1 })
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        match &expr.op {
            Operator::Filter { .. } | Operator::Project { .. } => {
                vec![RuleResult::physical(expr.op.clone(), self.convention, &expr.children)]
            }
            Operator::Join {
                join_type: JoinType::Inner,
                ..
            } if self.convention == Convention::COMPILED => {
                let &[left, right] = expr.children.as_slice() else {
                    return vec![];
                };
                vec![RuleResult::Physical {
                    op: expr.op.clone(),
                    convention: Convention::COMPILED,
                    inputs: vec![(left, Convention::COMPILED), (right, Convention::ITERATOR)],
                }]
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relx_core::catalog::InMemoryCatalog;
    use relx_core::memo::GroupId;

    fn scan(memo: &mut Memo, name: &str) -> GroupId {
        memo.add_logical(
            Operator::Scan {
                table: TableRef::new("s", name),
                row_type: RowType::new(vec![Field::new(name, DataType::Int64)]),
            },
            vec![],
        )
        .unwrap()
    }

    fn join(memo: &mut Memo, join_type: JoinType) -> (GroupId, GroupId, GroupId) {
        let a = scan(memo, "a");
        let b = scan(memo, "b");
        let join = memo
            .add_logical(
                Operator::Join {
                    join_type,
                    condition: Expr::binary(BinaryOp::Eq, Expr::col("a", 0), Expr::col("b", 1)),
                },
                vec![a, b],
            )
            .unwrap();
        (a, b, join)
    }

    fn apply(rule: &ImplCompiledRule, memo: &Memo, group: GroupId) -> Vec<RuleResult> {
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        rule.apply(memo.expr(memo.group(group).exprs[0]), memo, &ctx)
    }

    #[test]
    fn test_join_drives_compiled_left_and_reopens_iterator_right() {
        let mut memo = Memo::new();
        let (a, b, join) = join(&mut memo, JoinType::Inner);

        let results = apply(&ImplCompiledRule::join(), &memo, join);
        let [RuleResult::Physical { op, convention, inputs }] = &results[..] else {
            panic!("expected one physical join, got {results:?}");
        };
        assert!(matches!(op, Operator::Join { .. }));
        assert_eq!(*convention, Convention::COMPILED);
        assert_eq!(
            inputs,
            &vec![(a, Convention::COMPILED), (b, Convention::ITERATOR)]
        );
    }

    #[test]
    fn test_outer_join_is_not_compiled() {
        let mut memo = Memo::new();
        let (_, _, join) = join(&mut memo, JoinType::Left);
        assert!(apply(&ImplCompiledRule::join(), &memo, join).is_empty());
    }

    #[test]
    fn test_record_filter_keeps_input_in_records() {
        let mut memo = Memo::new();
        let input = scan(&mut memo, "a");
        let filter = memo
            .add_logical(
                Operator::Filter {
                    predicate: Expr::binary(BinaryOp::Gt, Expr::col("a", 0), Expr::lit(1i64)),
                },
                vec![input],
            )
            .unwrap();

        let results = apply(&ImplCompiledRule::record_filter(), &memo, filter);
        let [RuleResult::Physical { convention, inputs, .. }] = &results[..] else {
            panic!("expected one physical filter, got {results:?}");
        };
        assert_eq!(*convention, Convention::COMPILED_RECORD);
        assert_eq!(inputs, &vec![(input, Convention::COMPILED_RECORD)]);
        // The record rules never compile a join.
        let (_, _, join) = join(&mut memo, JoinType::Inner);
        assert!(apply(&ImplCompiledRule::record_filter(), &memo, join).is_empty());
    }
}
