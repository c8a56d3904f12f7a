//! Collapse stacked projections: `Project(e1, Project(e2, X))` → `Project(e1[e2], X)`,
//! where `e1[e2]` replaces every column reference in `e1` with the inner expression
//! it reads.
//!
//! When the composition is the identity over the inner input, the input's own
//! expressions are proposed instead. Commuting a join twice ends here.

use relx_core::expr::*;
use relx_core::memo::{Memo, MemoExpr};
use relx_core::pattern::Pattern;
use relx_core::rule::{OptContext, Rule, RuleResult, RuleType};

use crate::remove_trivial_project::{input_alternatives, is_trivial};

pub struct MergeProjectRule;

impl Rule for MergeProjectRule {
    fn name(&self) -> &str {
        "MergeProject"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::project_project()
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        let Operator::Project { exprs: outer, row_type } = &expr.op else {
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
            .flat_map(|e| match &e.op {
                Operator::Project { exprs: inner, .. } => {
                    let merged: Option<Vec<Expr>> = outer.iter().map(|o| inline(o, inner)).collect();
                    let Some(merged) = merged else {
                        return vec![];
                    };
                    match e.children.first() {
                        Some(&input) if is_trivial(&merged, row_type, memo, input) => {
                            input_alternatives(memo, input)
                        }
                        _ => vec![RuleResult::Substitution(
                            Operator::Project {
                                exprs: merged,
                                row_type: row_type.clone(),
                            },
                            e.children.clone(),
                        )],
                    }
                }
                _ => vec![],
            })
            .collect()
    }
}

/// Substitute `inner[i]` for every `$i` in `expr`. `None` if a reference is out of
/// range.
fn inline(expr: &Expr, inner: &[Expr]) -> Option<Expr> {
    let all = |exprs: &[Expr]| exprs.iter().map(|e| inline(e, inner)).collect::<Option<Vec<_>>>();
    Some(match expr {
        Expr::Column(c) => inner.get(c.index as usize)?.clone(),
        Expr::Literal(v) => Expr::Literal(v.clone()),
        Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
            op: *op,
            left: Box::new(inline(left, inner)?),
            right: Box::new(inline(right, inner)?),
        },
        Expr::UnaryOp { op, operand } => Expr::UnaryOp {
            op: *op,
            operand: Box::new(inline(operand, inner)?),
        },
        Expr::Function { name, args } => Expr::Function {
            name: name.clone(),
            args: all(args)?,
        },
        Expr::And(exprs) => Expr::And(all(exprs)?),
        Expr::Or(exprs) => Expr::Or(all(exprs)?),
    })
}
