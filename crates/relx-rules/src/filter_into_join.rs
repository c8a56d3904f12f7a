//! # Filter Into Join Rule
//!
//! When a Filter sits on top of an inner Join, the filter predicate can be evaluated
//! as part of the join condition:
//!
//! ```text
//! Before: Filter(pred, Join(A, B, cond))
//! After:  Join(A, B, cond AND pred)
//! ```
//!
//! The new join is added to the filter's group as an equivalent alternative; the
//! original Filter-over-Join stays in the memo and the cost model chooses. Left joins
//! are skipped: a predicate over the NULL-padded side filters rows the join would
//! otherwise keep.

use relx_core::expr::*;
use relx_core::memo::{Memo, MemoExpr};
use relx_core::pattern::Pattern;
use relx_core::rule::{OptContext, Rule, RuleResult, RuleType};

pub struct FilterIntoJoinRule;

impl Rule for FilterIntoJoinRule {
    fn name(&self) -> &str {
        "FilterIntoJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_join()
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        let Operator::Filter { predicate } = &expr.op else {
            return vec![];
        };
        let Some(&child) = expr.children.first() else {
            return vec![];
        };

        memo.group(child)
            .exprs
            .iter()
            .filter_map(|&eid| {
                let e = memo.expr(eid);
                let Operator::Join {
                    join_type: JoinType::Inner,
                    condition,
                } = &e.op
                else {
                    return None;
                };
                if !e.is_logical() {
                    return None;
                }
                let mut conjuncts: Vec<Expr> = condition
                    .conjuncts()
                    .into_iter()
                    .filter(|c| !matches!(c, Expr::Literal(ScalarValue::Bool(true))))
                    .cloned()
                    .collect();
                conjuncts.extend(predicate.conjuncts().into_iter().cloned());
                Some(RuleResult::Substitution(
                    Operator::Join {
                        join_type: JoinType::Inner,
                        condition: Expr::conjunction(conjuncts),
                    },
                    e.children.clone(),
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relx_core::catalog::InMemoryCatalog;

    fn side(name: &str) -> Operator {
        Operator::Scan {
            table: TableRef::new("s", name),
            row_type: RowType::new(vec![Field::new(name, DataType::Int64)]),
        }
    }

    #[test]
    fn test_merges_predicate_into_condition() {
        let mut memo = Memo::new();
        let a = memo.add_logical(side("a"), vec![]).unwrap();
        let b = memo.add_logical(side("b"), vec![]).unwrap();
        let join = memo
            .add_logical(
                Operator::Join {
                    join_type: JoinType::Inner,
                    condition: Expr::lit(true),
                },
                vec![a, b],
            )
            .unwrap();
        let pred = Expr::binary(BinaryOp::Eq, Expr::col("a", 0), Expr::col("b", 1));
        let filter = memo
            .add_logical(Operator::Filter { predicate: pred.clone() }, vec![join])
            .unwrap();

        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let expr = memo.expr(memo.group(filter).exprs[0]);
        let results = FilterIntoJoinRule.apply(expr, &memo, &ctx);
        assert_eq!(results.len(), 1);
        let RuleResult::Substitution(Operator::Join { condition, .. }, children) = &results[0] else {
            panic!("Expected a join substitution");
        };
        assert_eq!(condition, &pred);
        assert_eq!(children, &vec![a, b]);
    }
}
