//! Drop projections that return their input unchanged.
//!
//! A projection is trivial when it lists every input column in order and its row type
//! equals the input's. The projection's group is then the same relation as its input,
//! so the rule re-proposes the input's logical expressions here and the memo merges
//! the two groups.

use relx_core::expr::*;
use relx_core::memo::{GroupId, Memo, MemoExpr};
use relx_core::pattern::Pattern;
use relx_core::rule::{OptContext, Rule, RuleResult, RuleType};

pub struct RemoveTrivialProjectRule;

impl Rule for RemoveTrivialProjectRule {
    fn name(&self) -> &str {
        "RemoveTrivialProject"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        let Operator::Project { exprs, row_type } = &expr.op else {
            return vec![];
        };
        let Some(&child) = expr.children.first() else {
            return vec![];
        };
        if !is_trivial(exprs, row_type, memo, child) {
            return vec![];
        }
        input_alternatives(memo, child)
    }
}

/// `[$0, $1, ..., $n-1]` over `input`, producing exactly `input`'s row type.
pub(crate) fn is_trivial(exprs: &[Expr], row_type: &RowType, memo: &Memo, input: GroupId) -> bool {
    let input = memo.group(input);
    exprs.len() == input.row_type.len()
        && *row_type == input.row_type
        && exprs
            .iter()
            .enumerate()
            .all(|(i, e)| matches!(e, Expr::Column(c) if c.index as usize == i))
}

/// The logical members of `group`, re-proposed for the group being rewritten.
pub(crate) fn input_alternatives(memo: &Memo, group: GroupId) -> Vec<RuleResult> {
    memo.group(group)
        .exprs
        .iter()
        .map(|&eid| memo.expr(eid))
        .filter(|e| e.is_logical())
        .map(|e| RuleResult::Substitution(e.op.clone(), e.children.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relx_core::catalog::InMemoryCatalog;

    fn row_type(names: &[&str]) -> RowType {
        RowType::new(names.iter().map(|n| Field::new(*n, DataType::Int64)).collect())
    }

    fn values(memo: &mut Memo) -> GroupId {
        memo.add_logical(
            Operator::Values {
                row_type: row_type(&["a", "b"]),
                rows: vec![vec![ScalarValue::Int64(1), ScalarValue::Int64(2)]],
            },
            vec![],
        )
        .unwrap()
    }

    fn apply(memo: &Memo, group: GroupId) -> Vec<RuleResult> {
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        RemoveTrivialProjectRule.apply(memo.expr(memo.group(group).exprs[0]), memo, &ctx)
    }

    #[test]
    fn test_identity_projection_is_replaced_by_its_input() {
        let mut memo = Memo::new();
        let input = values(&mut memo);
        let project = memo
            .add_logical(
                Operator::Project {
                    exprs: vec![Expr::col("a", 0), Expr::col("b", 1)],
                    row_type: row_type(&["a", "b"]),
                },
                vec![input],
            )
            .unwrap();

        let results = apply(&memo, project);
        assert!(matches!(
            &results[..],
            [RuleResult::Substitution(Operator::Values { .. }, children)] if children.is_empty()
        ));
    }

    #[test]
    fn test_reordering_or_renaming_is_kept() {
        let mut memo = Memo::new();
        let input = values(&mut memo);
        let swapped = memo
            .add_logical(
                Operator::Project {
                    exprs: vec![Expr::col("b", 1), Expr::col("a", 0)],
                    row_type: row_type(&["b", "a"]),
                },
                vec![input],
            )
            .unwrap();
        assert!(apply(&memo, swapped).is_empty());

        let renamed = memo
            .add_logical(
                Operator::Project {
                    exprs: vec![Expr::col("a", 0), Expr::col("b", 1)],
                    row_type: row_type(&["x", "y"]),
                },
                vec![input],
            )
            .unwrap();
        assert!(apply(&memo, renamed).is_empty());
    }
}
