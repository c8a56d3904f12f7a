//! # Join Commutativity Rule
//!
//! `A JOIN B = B JOIN A` for inner joins. Left joins have fixed sides and are never
//! commuted.
//!
//! Swapping the inputs also swaps the column order of the join output, so the swapped
//! join cannot simply join the original group: its row type differs. The rule
//! instead proposes a permuting projection over the swapped join,
//!
//! ```text
//! Join(A, B, cond)  →  Project[restore order](Join(B, A, cond'))
//! ```
//!
//! where `cond'` addresses the concatenated row `B ++ A`. The swapped join lands in a
//! new group; commuting it again yields `Join(A, B, cond)` once more, which the memo
//! recognizes as the original expression.

use relx_core::expr::*;
use relx_core::memo::{Memo, MemoExpr};
use relx_core::pattern::Pattern;
use relx_core::rule::{OptContext, Rule, RuleChild, RuleResult, RuleType};

pub struct JoinCommutativityRule;

impl Rule for JoinCommutativityRule {
    fn name(&self) -> &str {
        "JoinCommutativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        let Operator::Join {
            join_type: JoinType::Inner,
            condition,
        } = &expr.op
        else {
            return vec![];
        };
        let &[left, right] = expr.children.as_slice() else {
            return vec![];
        };

        let left_width = memo.group(left).row_type.len() as u32;
        let right_width = memo.group(right).row_type.len() as u32;
        let output = memo.group(expr.group).row_type.clone();

        let swapped = Operator::Join {
            join_type: JoinType::Inner,
            condition: swap_condition_sides(condition, left_width, right_width),
        };
        let restore: Vec<Expr> = output
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let i = i as u32;
                let index = if i < left_width { right_width + i } else { i - left_width };
                Expr::col(field.name.clone(), index)
            })
            .collect();

        vec![RuleResult::NewChildren(
            Operator::Project {
                exprs: restore,
                row_type: output,
            },
            vec![RuleChild::NewExpr(
                swapped,
                vec![RuleChild::Group(right), RuleChild::Group(left)],
            )],
        )]
    }
}

/// Re-address a condition over `left ++ right` to `right ++ left`.
fn swap_condition_sides(expr: &Expr, left_width: u32, right_width: u32) -> Expr {
    expr.map_columns(&|i| {
        if i < left_width {
            i + right_width
        } else {
            i - left_width
        }
    })
}
