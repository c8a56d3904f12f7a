//! Collapse stacked filters: `Filter(p1, Filter(p2, X))` → `Filter(p2 AND p1, X)`.

use relx_core::expr::*;
use relx_core::memo::{Memo, MemoExpr};
use relx_core::pattern::Pattern;
use relx_core::rule::{OptContext, Rule, RuleResult, RuleType};

pub struct MergeFilterRule;

impl Rule for MergeFilterRule {
    fn name(&self) -> &str {
        "MergeFilter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_filter()
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        let Operator::Filter { predicate: outer } = &expr.op else {
            return vec![];
        };
        let Some(&child) = expr.children.first() else {
            return vec![];
        };

        memo.group(child)
            .exprs
            .iter()
            .map(|&eid| memo.expr(eid))
            .filter(|e| e.is_logical())
            .filter_map(|e| match &e.op {
                Operator::Filter { predicate: inner } => {
                    let conjuncts: Vec<Expr> = inner
                        .conjuncts()
                        .into_iter()
                        .chain(outer.conjuncts())
                        .cloned()
                        .collect();
                    Some(RuleResult::Substitution(
                        Operator::Filter {
                            predicate: Expr::conjunction(conjuncts),
                        },
                        e.children.clone(),
                    ))
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relx_core::catalog::InMemoryCatalog;

    fn gt(column: u32, value: i64) -> Expr {
        Expr::binary(BinaryOp::Gt, Expr::col("x", column), Expr::lit(value))
    }

    #[test]
    fn test_stacked_filters_become_one_conjunction() {
        let mut memo = Memo::new();
        let scan = memo
            .add_logical(
                Operator::Scan {
                    table: TableRef::new("s", "t"),
                    row_type: RowType::new(vec![Field::new("x", DataType::Int64)]),
                },
                vec![],
            )
            .unwrap();
        // The inner filter is already a conjunction; it is flattened, not nested.
        let inner = memo
            .add_logical(
                Operator::Filter {
                    predicate: Expr::And(vec![gt(0, 1), gt(0, 2)]),
                },
                vec![scan],
            )
            .unwrap();
        let outer = memo
            .add_logical(Operator::Filter { predicate: gt(0, 3) }, vec![inner])
            .unwrap();

        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let results = MergeFilterRule.apply(memo.expr(memo.group(outer).exprs[0]), &memo, &ctx);
        let [RuleResult::Substitution(Operator::Filter { predicate }, children)] = &results[..] else {
            panic!("expected one merged filter, got {results:?}");
        };
        assert_eq!(children, &vec![scan]);
        assert_eq!(predicate, &Expr::And(vec![gt(0, 1), gt(0, 2), gt(0, 3)]));
    }

    #[test]
    fn test_filter_over_scan_is_untouched() {
        let mut memo = Memo::new();
        let scan = memo
            .add_logical(
                Operator::Scan {
                    table: TableRef::new("s", "t"),
                    row_type: RowType::new(vec![Field::new("x", DataType::Int64)]),
                },
                vec![],
            )
            .unwrap();
        let filter = memo
            .add_logical(Operator::Filter { predicate: gt(0, 3) }, vec![scan])
            .unwrap();

        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        assert!(MergeFilterRule
            .apply(memo.expr(memo.group(filter).exprs[0]), &memo, &ctx)
            .is_empty());
    }
}
