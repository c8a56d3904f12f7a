//! # Rule System
//!
//! Rules are the only way the search space grows.
//!
//! - **Transformation rules** (`RuleType::Transformation`) rewrite a logical expression
//!   into an equivalent logical one, e.g. join commutativity or merging a filter into
//!   a join condition.
//! - **Implementation rules** (`RuleType::Implementation`) propose a physical
//!   expression in some calling convention, together with the convention that
//!   expression requires of each input. The search records those requirements on the
//!   child groups and inserts converters where no member satisfies them.
//!
//! Rules never mutate their input. They return [`RuleResult`]s; the search inserts
//! them into the memo, where structurally equal proposals are absorbed.
//!
//! ## Rule Deduplication
//!
//! Each rule has a `rule_hash()` fingerprint. The memo remembers which rules fired on
//! which expression so a rule is applied at most once per expression (commutativity
//! would otherwise swap back and forth forever).

use crate::catalog::Catalog;
use crate::convention::Convention;
use crate::expr::Operator;
use crate::memo::{GroupId, Memo, MemoExpr};
use crate::pattern::Pattern;
use std::hash::{Hash, Hasher};

/// Classification of optimization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Logical → logical.
    Transformation,
    /// Logical → physical in a calling convention.
    Implementation,
}

/// Context passed to rules during application.
pub struct OptContext<'a> {
    pub catalog: &'a dyn Catalog,
}

/// A child reference in a rule result: an existing group or a new logical
/// sub-expression that the search places in a new (or matching existing) group.
#[derive(Debug, Clone)]
pub enum RuleChild {
    Group(GroupId),
    NewExpr(Operator, Vec<RuleChild>),
}

/// Result of applying a rule to an expression.
#[derive(Debug, Clone)]
pub enum RuleResult {
    /// A logical alternative over existing child groups.
    Substitution(Operator, Vec<GroupId>),
    /// A logical alternative where some children are new sub-expressions.
    NewChildren(Operator, Vec<RuleChild>),
    /// A physical alternative in `convention`. Each input names a child group and the
    /// convention required of it.
    Physical {
        op: Operator,
        convention: Convention,
        inputs: Vec<(GroupId, Convention)>,
    },
}

impl RuleResult {
    /// Physical alternative whose inputs all use the node's own convention.
    pub fn physical(op: Operator, convention: Convention, children: &[GroupId]) -> Self {
        RuleResult::Physical {
            op,
            convention,
            inputs: children.iter().map(|&g| (g, convention)).collect(),
        }
    }
}

/// A rule transforms or implements expressions.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    /// Pattern that this rule matches against.
    fn pattern(&self) -> Pattern;

    /// Apply the rule to a matching expression.
    fn apply(&self, expr: &MemoExpr, memo: &Memo, ctx: &OptContext) -> Vec<RuleResult>;

    /// Hash for fingerprinting (to avoid re-applying rules).
    fn rule_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name().hash(&mut hasher);
        hasher.finish()
    }
}
