//! Federated table access.
//!
//! A table owned by a federated source is contributed as a scan in the `FEDERATED`
//! convention. Nothing in the native engine consumes `FEDERATED` directly; a
//! registered convertlet pulls its rows into `ITERATOR`, and longer paths (for
//! example into `COMPILED`) are chained by the planner.

use relx_core::convention::Convention;
use relx_core::expr::*;
use relx_core::memo::{Memo, MemoExpr};
use relx_core::pattern::Pattern;
use relx_core::rule::{OptContext, Rule, RuleResult, RuleType};

pub struct FederatedScanRule;

impl Rule for FederatedScanRule {
    fn name(&self) -> &str {
        "FederatedScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::scan()
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, ctx: &OptContext) -> Vec<RuleResult> {
        let Operator::Scan { table, .. } = &expr.op else {
            return vec![];
        };
        if !ctx.catalog.is_federated(table) {
            return vec![];
        }
        vec![RuleResult::physical(expr.op.clone(), Convention::FEDERATED, &[])]
    }
}
