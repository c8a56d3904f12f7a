//! # Volcano Search
//!
//! This module drives the optimization of one logical plan to a fixpoint.
//!
//! ## How It Works
//!
//! The memo starts with the logical plan; the root group is required in the goal
//! convention. Each iteration of the fixpoint loop runs two passes:
//!
//! 1. **Rule pass** (`fire_rules`): every registered rule, in registration order, is
//!    matched against every member of every group it has not fired on yet.
//!    Transformation rules add logical alternatives; implementation rules add
//!    physical expressions and record, on each child group, the convention the new
//!    expression requires of it.
//!
//! 2. **Conversion pass** (`insert_converters`): for every group and every convention
//!    required of it, a chain of converter nodes is synthesized from each convention
//!    already present in the group, following the shortest registered conversion
//!    path. A converter's child is the group itself, so it picks up the cheapest
//!    member in its source convention. Converters between equal conventions are never
//!    created, and a missing path simply prunes the alternative.
//!
//! The loop ends at a fixpoint (neither pass produced anything new), when a budget
//! runs out, or when a cost ceiling was given and the goal is already met at or below
//! it. Budgets are checked at the top of every iteration.
//!
//! ## Cost Comparison
//!
//! Winners per (group, convention) are computed by relaxation: passes over all
//! physical expressions are repeated until no winner improves. This resolves the
//! self-references converters introduce. Only a strictly better cost replaces a
//! winner; on an exact tie the earlier inserted expression wins. Every computed cost
//! must be at least the cost of each input: a cost model or convertlet producing a
//! negative or NaN increment aborts the optimization with `NonMonotonicCost`.

use crate::catalog::Catalog;
use crate::convention::Convention;
use crate::cost::{Cost, CostModel};
use crate::error::OptimizationError;
use crate::expr::*;
use crate::memo::{ExprId, GroupId, Memo, PhysicalPlan, Winner};
use crate::pattern::matches;
use crate::registry::Registry;
use crate::rule::{OptContext, RuleChild, RuleResult};
use crate::stats::{self, Statistics};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Configuration knobs for the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Upper bound on the number of live groups in the memo.
    pub max_memo_groups: usize,
    /// Upper bound on rule firings plus converter insertions.
    pub max_iterations: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_memo_groups: 100_000,
            max_iterations: 1_000_000,
        }
    }
}

/// What the caller wants from the root group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Goal {
    pub convention: Convention,
    /// Stop searching once a plan at or below this cost exists.
    pub cost_ceiling: Option<f64>,
}

impl Goal {
    pub fn new(convention: Convention) -> Self {
        Self {
            convention,
            cost_ceiling: None,
        }
    }

    pub fn with_cost_ceiling(mut self, ceiling: f64) -> Self {
        self.cost_ceiling = Some(ceiling);
        self
    }
}

const CONVERTER_ORIGIN: &str = "converter insertion";

/// The Volcano search engine. One instance optimizes one plan.
pub struct VolcanoSearch {
    pub memo: Memo,
    pub registry: Arc<Registry>,
    pub cost_model: Arc<dyn CostModel>,
    pub catalog: Arc<dyn Catalog>,
    pub config: SearchConfig,
    /// Rule firings plus converter insertions so far.
    iterations: usize,
    /// Set when a pass stopped early on the iteration budget.
    cut_short: bool,
    /// (group, from, to) conversions already synthesized.
    attempted: HashSet<(GroupId, Convention, Convention)>,
}

impl VolcanoSearch {
    pub fn new(
        memo: Memo,
        registry: Arc<Registry>,
        cost_model: Arc<dyn CostModel>,
        catalog: Arc<dyn Catalog>,
        config: SearchConfig,
    ) -> Self {
        Self {
            memo,
            registry,
            cost_model,
            catalog,
            config,
            iterations: 0,
            cut_short: false,
            attempted: HashSet::new(),
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Optimize `root` for `goal`.
    pub fn optimize(&mut self, root: GroupId, goal: &Goal) -> Result<PhysicalPlan, OptimizationError> {
        debug!(
            "Starting Volcano optimization: root_group={}, goal={}, groups={}, exprs={}",
            root,
            goal.convention,
            self.memo.num_groups(),
            self.memo.num_exprs()
        );
        self.memo.group_mut(root).require(goal.convention);

        let mut exhausted = false;
        loop {
            if self.cut_short
                || self.iterations >= self.config.max_iterations
                || self.memo.num_groups() >= self.config.max_memo_groups
            {
                debug!(
                    "Search budget exhausted: iterations={}, groups={}",
                    self.iterations,
                    self.memo.num_groups()
                );
                exhausted = true;
                break;
            }
            if let Some(ceiling) = goal.cost_ceiling {
                self.compute_winners()?;
                if let Some(w) = self.winner(root, goal.convention) {
                    if w.cost.total <= ceiling {
                        debug!("Goal met within cost ceiling: cost={:.2} <= {:.2}", w.cost.total, ceiling);
                        break;
                    }
                }
            }

            let fired = self.fire_rules()?;
            let converted = self.insert_converters(true)?;
            if !fired && !converted {
                debug!("Reached fixpoint after {} iterations", self.iterations);
                break;
            }
        }

        self.compute_winners()?;
        if self.winner(root, goal.convention).is_none() {
            // One last pass over conversions the budget kept us from trying.
            self.insert_converters(false)?;
            self.compute_winners()?;
        }

        let Some(winner) = self.winner(root, goal.convention) else {
            if exhausted {
                return Err(OptimizationError::BudgetExceeded {
                    iterations: self.iterations,
                    required: goal.convention,
                });
            }
            let group = self.memo.group(root);
            let operator = group
                .exprs
                .first()
                .map(|&e| format!("{:?}", self.memo.expr(e).op.kind()))
                .unwrap_or_default();
            debug!("Optimization failed: {} cannot be produced in {}", operator, goal.convention);
            return Err(OptimizationError::UnsatisfiableConvention {
                operator,
                required: goal.convention,
            });
        };

        let over_ceiling = goal.cost_ceiling.is_some_and(|c| winner.cost.total > c);
        let plan = self.memo.extract(root, goal.convention)?;
        debug!(
            "Optimization complete: cost={:.2}, iterations={}, truncated={}",
            winner.cost.total,
            self.iterations,
            exhausted || over_ceiling
        );
        Ok(PhysicalPlan::new(plan, exhausted || over_ceiling))
    }

    fn winner(&self, group: GroupId, convention: Convention) -> Option<Winner> {
        self.memo.group(group).winners.get(&convention).copied()
    }

    fn budget_left(&mut self) -> bool {
        if self.iterations >= self.config.max_iterations {
            self.cut_short = true;
            return false;
        }
        self.iterations += 1;
        true
    }

    /// One pass of every rule over every expression. Returns whether the memo changed.
    fn fire_rules(&mut self) -> Result<bool, OptimizationError> {
        let exprs_before = self.memo.num_exprs();
        let merges_before = self.memo.merges();
        let registry = Arc::clone(&self.registry);
        let catalog = Arc::clone(&self.catalog);

        for group_id in self.memo.group_ids() {
            // Snapshot: rule application may add expressions to this group.
            let members: Vec<ExprId> = self.memo.group(group_id).exprs.clone();
            for expr_id in members {
                for rule in registry.rules() {
                    let rule_hash = rule.rule_hash();
                    if self.memo.rule_applied(expr_id, rule_hash) {
                        continue;
                    }
                    if !matches(&self.memo, expr_id, &rule.pattern()) {
                        continue;
                    }
                    if !self.budget_left() {
                        return Ok(true);
                    }

                    trace!("Applying rule '{}' to expr {}", rule.name(), expr_id);
                    let ctx = OptContext {
                        catalog: catalog.as_ref(),
                    };
                    let results = rule.apply(self.memo.expr(expr_id), &self.memo, &ctx);
                    self.memo.mark_rule_applied(expr_id, rule_hash);

                    let target = self.memo.expr(expr_id).group;
                    for result in results {
                        self.insert_result(target, result, rule.name())?;
                    }
                }
            }
        }

        Ok(self.memo.num_exprs() > exprs_before || self.memo.merges() > merges_before)
    }

    fn insert_result(
        &mut self,
        group: GroupId,
        result: RuleResult,
        rule: &str,
    ) -> Result<(), OptimizationError> {
        match result {
            RuleResult::Substitution(op, children) => {
                let inputs = vec![Convention::NONE; children.len()];
                let id = self
                    .memo
                    .add_expr_to_group(group, op, Convention::NONE, children, inputs, rule)?;
                trace!("  Created expr {} in group {}", id, group);
            }
            RuleResult::NewChildren(op, children) => {
                let mut groups = Vec::with_capacity(children.len());
                for child in children {
                    groups.push(self.materialize(child)?);
                }
                let inputs = vec![Convention::NONE; groups.len()];
                let id = self
                    .memo
                    .add_expr_to_group(group, op, Convention::NONE, groups, inputs, rule)?;
                trace!("  Created expr {} in group {}", id, group);
            }
            RuleResult::Physical {
                op,
                convention,
                inputs,
            } => {
                if let Operator::Converter { from } = op {
                    if from == convention {
                        trace!("  Eliding no-op converter in {}", convention);
                        return Ok(());
                    }
                }
                let (children, conventions): (Vec<GroupId>, Vec<Convention>) = inputs.into_iter().unzip();
                for (&child, &required) in children.iter().zip(&conventions) {
                    self.memo.group_mut(child).require(required);
                }
                let id = self
                    .memo
                    .add_expr_to_group(group, op, convention, children, conventions, rule)?;
                trace!("  Created {} expr {} in group {}", convention, id, group);
            }
        }
        Ok(())
    }

    /// Place a rule-created logical sub-expression in the memo, bottom-up.
    fn materialize(&mut self, child: RuleChild) -> Result<GroupId, OptimizationError> {
        match child {
            RuleChild::Group(g) => Ok(self.memo.find(g)),
            RuleChild::NewExpr(op, children) => {
                let mut groups = Vec::with_capacity(children.len());
                for c in children {
                    groups.push(self.materialize(c)?);
                }
                self.memo.add_logical(op, groups)
            }
        }
    }

    /// Synthesize converter chains for unmet convention requirements. When `bounded`
    /// the pass stops at the iteration budget.
    fn insert_converters(&mut self, bounded: bool) -> Result<bool, OptimizationError> {
        let mut progress = false;
        let registry = Arc::clone(&self.registry);

        for group_id in self.memo.group_ids() {
            let group_id = self.memo.find(group_id);
            let required = self.memo.group(group_id).required.clone();
            let mut present: Vec<Convention> = Vec::new();
            for &e in &self.memo.group(group_id).exprs {
                let c = self.memo.expr(e).convention;
                if !c.is_none() && !present.contains(&c) {
                    present.push(c);
                }
            }

            for &to in required.iter().filter(|c| !c.is_none()) {
                for &from in &present {
                    if from == to || self.attempted.contains(&(group_id, from, to)) {
                        continue;
                    }
                    let Some(path) = registry.traits().conversion_path(from, to) else {
                        trace!("No conversion path {} -> {} for group {}", from, to, group_id);
                        self.attempted.insert((group_id, from, to));
                        continue;
                    };
                    // A pair counts as attempted only once its whole chain is in the memo;
                    // hops already inserted before a budget cut are deduplicated on retry.
                    for hop in path.windows(2) {
                        if bounded && !self.budget_left() {
                            return Ok(true);
                        }
                        let before = self.memo.num_exprs();
                        let id = self.memo.add_expr_to_group(
                            group_id,
                            Operator::Converter { from: hop[0] },
                            hop[1],
                            vec![group_id],
                            vec![hop[0]],
                            CONVERTER_ORIGIN,
                        )?;
                        if self.memo.num_exprs() > before {
                            trace!("Inserted converter {} -> {} as expr {} in group {}", hop[0], hop[1], id, group_id);
                            progress = true;
                        }
                    }
                    self.attempted.insert((group_id, from, to));
                }
            }
        }
        Ok(progress)
    }

    /// Recompute every winner by relaxation.
    fn compute_winners(&mut self) -> Result<(), OptimizationError> {
        let groups = self.memo.group_ids();
        for &g in &groups {
            self.memo.group_mut(g).winners.clear();
            self.derive_group_stats(g);
        }

        loop {
            let mut changed = false;
            for &group_id in &groups {
                let members = self.memo.group(group_id).exprs.clone();
                for expr_id in members {
                    let expr = self.memo.expr(expr_id);
                    if expr.is_logical() {
                        continue;
                    }
                    let convention = expr.convention;
                    let Some(cost) = self.cost_expr(expr_id)? else {
                        continue;
                    };
                    let group = self.memo.group_mut(group_id);
                    let better = match group.winners.get(&convention) {
                        None => true,
                        Some(w) => {
                            cost.total < w.cost.total || (cost.total == w.cost.total && expr_id < w.expr_id)
                        }
                    };
                    if better {
                        group.winners.insert(convention, Winner { expr_id, cost });
                        changed = true;
                    }
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Cost of a physical expression given the current winners of its inputs, or
    /// `None` while some input has no winner in the convention it requires.
    fn cost_expr(&self, expr_id: ExprId) -> Result<Option<Cost>, OptimizationError> {
        let expr = self.memo.expr(expr_id);
        let mut child_costs = Vec::with_capacity(expr.children.len());
        let mut child_stats = Vec::with_capacity(expr.children.len());
        for (&child, &required) in expr.children.iter().zip(&expr.input_conventions) {
            let group = self.memo.group(child);
            let Some(w) = group.winners.get(&required) else {
                return Ok(None);
            };
            child_costs.push(w.cost);
            child_stats.push(group.stats.clone().unwrap_or_else(Statistics::unknown));
        }

        let own_stats = self
            .memo
            .group(expr.group)
            .stats
            .clone()
            .unwrap_or_else(Statistics::unknown);

        let cost = match &expr.op {
            Operator::Converter { from } => {
                let Ok(convertlet) = self.registry.convertlets().lookup(*from, expr.convention) else {
                    return Ok(None);
                };
                let input = child_costs.first().copied().unwrap_or_else(Cost::zero);
                let local = convertlet.estimated_cost(&self.memo.group(expr.group).row_type, own_stats.row_count);
                Cost::new(input.total + local.total)
            }
            op => {
                let stats_refs: Vec<&Statistics> = if child_stats.is_empty() {
                    vec![&own_stats]
                } else {
                    child_stats.iter().collect()
                };
                self.cost_model
                    .compute_cost(op, expr.convention, &stats_refs, &child_costs)
            }
        };

        let input_cost = child_costs.iter().map(|c| c.total).fold(0.0, f64::max);
        if cost.total.is_nan() || cost.total < input_cost {
            return Err(OptimizationError::NonMonotonicCost {
                node: format!("{} <{}>", expr.op, expr.convention),
                cost: cost.total,
                input_cost,
            });
        }
        Ok(Some(cost))
    }

    /// Derive statistics for a group from its first logical expression that does not
    /// read the group itself.
    fn derive_group_stats(&mut self, group_id: GroupId) {
        if self.memo.group(group_id).stats.is_some() {
            return;
        }
        // Placeholder while deriving: merged groups can reach themselves.
        self.memo.group_mut(group_id).stats = Some(Statistics::unknown());
        let canonical = self.memo.find(group_id);
        let representative = self.memo.group(group_id).exprs.iter().copied().find(|&e| {
            let expr = self.memo.expr(e);
            expr.is_logical() && !expr.children.iter().any(|&c| self.memo.find(c) == canonical)
        });
        let stats = match representative {
            Some(expr_id) => self.derive_expr_stats(expr_id),
            None => Statistics::unknown(),
        };
        self.memo.group_mut(group_id).stats = Some(stats);
    }

    fn child_stats(&mut self, child: GroupId) -> Statistics {
        self.derive_group_stats(child);
        self.memo
            .group(child)
            .stats
            .clone()
            .unwrap_or_else(Statistics::unknown)
    }

    fn derive_expr_stats(&mut self, expr_id: ExprId) -> Statistics {
        let expr = self.memo.expr(expr_id);
        let op = expr.op.clone();
        let children = expr.children.clone();

        match &op {
            Operator::Values { rows, row_type } => stats::derive_values_stats(row_type, rows),
            Operator::Scan { table, .. } => self
                .catalog
                .get_table_stats(table)
                .unwrap_or_else(Statistics::unknown),
            Operator::Filter { predicate } => {
                let input = self.child_stats(children[0]);
                let selectivity = self.estimate_selectivity(predicate, &input);
                stats::derive_filter_stats(&input, selectivity)
            }
            Operator::Join { condition, join_type } => {
                let left = self.child_stats(children[0]);
                let right = self.child_stats(children[1]);
                let join_cols = self.extract_equi_join_columns(condition);
                let mut out = stats::derive_join_stats(&left, &right, &join_cols);
                if *join_type == JoinType::Left {
                    out.row_count = out.row_count.max(left.row_count);
                }
                out
            }
            Operator::Limit { offset, count } => {
                let input = self.child_stats(children[0]);
                stats::derive_limit_stats(&input, *offset, *count)
            }
            Operator::Project { exprs, row_type } => {
                let input = self.child_stats(children[0]);
                stats::derive_project_stats(&input, exprs, row_type)
            }
            Operator::Sort { .. } | Operator::Converter { .. } => {
                self.child_stats(children[0])
            }
        }
    }

    /// Estimate the selectivity of a predicate expression.
    ///
    /// - equality against a column: 1 / NDV (uniform distribution);
    /// - range comparisons: 1/3;
    /// - AND multiplies (independence), OR uses inclusion-exclusion;
    /// - anything else: the default selectivity.
    fn estimate_selectivity(&self, expr: &Expr, stats: &Statistics) -> f64 {
        match expr {
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } => {
                if let Expr::Column(c) = left.as_ref() {
                    return stats::equality_selectivity(stats, &c.name);
                }
                if let Expr::Column(c) = right.as_ref() {
                    return stats::equality_selectivity(stats, &c.name);
                }
                stats::DEFAULT_FILTER_SELECTIVITY
            }
            Expr::BinaryOp {
                op: op @ (BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq),
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Column(c), Expr::Literal(v)) => stats::range_selectivity(stats, &c.name, *op, v),
                (Expr::Literal(v), Expr::Column(c)) => stats::range_selectivity(stats, &c.name, flip(*op), v),
                _ => stats::RANGE_SELECTIVITY,
            },
            Expr::Literal(ScalarValue::Bool(true)) => 1.0,
            Expr::And(conjuncts) => conjuncts
                .iter()
                .map(|c| self.estimate_selectivity(c, stats))
                .product(),
            Expr::Or(disjuncts) => {
                let product: f64 = disjuncts
                    .iter()
                    .map(|d| 1.0 - self.estimate_selectivity(d, stats))
                    .product();
                1.0 - product
            }
            _ => stats::DEFAULT_FILTER_SELECTIVITY,
        }
    }

    /// Equi-join column name pairs of a join condition.
    fn extract_equi_join_columns(&self, condition: &Expr) -> Vec<(String, String)> {
        condition
            .conjuncts()
            .into_iter()
            .filter_map(|c| match c {
                Expr::BinaryOp {
                    op: BinaryOp::Eq,
                    left,
                    right,
                } => match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(l), Expr::Column(r)) => Some((l.name.clone(), r.name.clone())),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }
}

/// `a < b` is `b > a`.
fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::LtEq => BinaryOp::GtEq,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::GtEq => BinaryOp::LtEq,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_config_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.max_memo_groups, 100_000);
        assert_eq!(config.max_iterations, 1_000_000);
    }

    #[test]
    fn test_goal_builder() {
        let goal = Goal::new(Convention::COMPILED).with_cost_ceiling(10.0);
        assert_eq!(goal.convention, Convention::COMPILED);
        assert_eq!(goal.cost_ceiling, Some(10.0));
    }
}
