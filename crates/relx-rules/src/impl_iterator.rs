//! # Iterator Implementation Rules
//!
//! Every logical operator has a pull-based implementation: the `ITERATOR` convention
//! is the universal fallback the planner can always reach. Each rule maps one
//! operator kind to the same operator in `ITERATOR`, requiring `ITERATOR` of all its
//! inputs.
//!
//! Scans of federated tables are left alone; their rows enter through
//! [`crate::impl_federated::FederatedScanRule`] and a converter.

use relx_core::convention::Convention;
use relx_core::expr::*;
use relx_core::memo::{Memo, MemoExpr};
use relx_core::pattern::Pattern;
use relx_core::rule::{OptContext, Rule, RuleResult, RuleType};

/// Implement one logical operator kind as a pull iterator.
pub struct ImplIteratorRule {
    kind: OpKind,
    name: &'static str,
}

impl ImplIteratorRule {
    pub fn values() -> Self {
        Self { kind: OpKind::Values, name: "ImplIteratorValues" }
    }

    pub fn scan() -> Self {
        Self { kind: OpKind::Scan, name: "ImplIteratorScan" }
    }

    pub fn filter() -> Self {
        Self { kind: OpKind::Filter, name: "ImplIteratorFilter" }
    }

    pub fn project() -> Self {
        Self { kind: OpKind::Project, name: "ImplIteratorProject" }
    }

    pub fn join() -> Self {
        Self { kind: OpKind::Join, name: "ImplIteratorJoin" }
    }

    pub fn sort() -> Self {
        Self { kind: OpKind::Sort, name: "ImplIteratorSort" }
    }

    pub fn limit() -> Self {
        Self { kind: OpKind::Limit, name: "ImplIteratorLimit" }
    }

    /// One rule per implementable operator kind.
    pub fn all() -> Vec<Self> {
        vec![
            Self::values(),
            Self::scan(),
            Self::filter(),
            Self::project(),
            Self::join(),
            Self::sort(),
            Self::limit(),
        ]
    }
}

impl Rule for ImplIteratorRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        let arity = match self.kind {
            OpKind::Values | OpKind::Scan => 0,
            OpKind::Join => 2,
            _ => 1,
        };
        Pattern::logical(self.kind, arity)
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, ctx: &OptContext) -> Vec<RuleResult> {
        if let Operator::Scan { table, .. } = &expr.op {
            if ctx.catalog.is_federated(table) {
                return vec![];
            }
        }
        vec![RuleResult::physical(
            expr.op.clone(),
            Convention::ITERATOR,
            &expr.children,
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relx_core::catalog::InMemoryCatalog;
    use relx_core::stats::Statistics;

    #[test]
    fn test_federated_scans_are_skipped() {
        let table = TableRef::new("remote", "orders");
        let row_type = RowType::new(vec![Field::new("id", DataType::Int64)]);
        let mut catalog = InMemoryCatalog::new();
        catalog.add_federated_table(&table, row_type.clone(), Statistics::new(10.0, 80.0));

        let mut memo = Memo::new();
        let g = memo
            .add_logical(Operator::Scan { table, row_type }, vec![])
            .unwrap();
        let expr = memo.expr(memo.group(g).exprs[0]);
        let ctx = OptContext { catalog: &catalog };
        assert!(ImplIteratorRule::scan().apply(expr, &memo, &ctx).is_empty());

        let local = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &local };
        let results = ImplIteratorRule::scan().apply(expr, &memo, &ctx);
        assert!(matches!(
            &results[..],
            [RuleResult::Physical { convention, inputs, .. }] if *convention == Convention::ITERATOR && inputs.is_empty()
        ));
    }
}
