//! # Cost Model
//!
//! A plan's cost is the sum of its local cost and the accumulated costs of its inputs.
//! Costs are therefore monotone along every root-to-leaf path; the search checks this
//! and rejects a cost model (or convertlet estimate) that breaks it.
//!
//! ## Convention Factors
//!
//! The same operator costs differently depending on how it is executed. The
//! `DefaultCostModel` computes a convention-independent amount of row work per
//! operator and scales it by a per-convention factor: generated code is cheaper per
//! row than pull iteration, fetching from a federated source is more expensive.
//! Logical operators (`NONE`) cost infinity and are never selected.

use crate::convention::Convention;
use crate::expr::Operator;
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};

/// Cost is a single comparable value representing the estimated expense of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// Lower is better. `f64::MAX` represents infinity.
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    pub fn is_infinite(&self) -> bool {
        self.total == f64::MAX
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

/// Trait for pluggable cost models.
///
/// Returns the *total* cost of `op` executed in `convention`: the children's costs
/// plus the local cost. Converters are costed by their convertlet, not here.
pub trait CostModel: Send + Sync {
    fn compute_cost(
        &self,
        op: &Operator,
        convention: Convention,
        input_stats: &[&Statistics],
        children_costs: &[Cost],
    ) -> Cost;
}

/// Default cost model: row work weighted by CPU/memory and scaled per convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultCostModel {
    /// Weight per row processed or comparison made.
    pub cpu_weight: f64,
    /// Weight per byte buffered (sorts).
    pub memory_weight: f64,
    pub iterator_factor: f64,
    pub compiled_factor: f64,
    pub compiled_record_factor: f64,
    pub federated_factor: f64,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 0.01,
            iterator_factor: 1.0,
            compiled_factor: 0.5,
            compiled_record_factor: 0.6,
            federated_factor: 2.0,
        }
    }
}

impl DefaultCostModel {
    /// Multiplier applied to local work in `convention`. Conventions registered by an
    /// embedder without a dedicated factor cost like iteration.
    pub fn convention_factor(&self, convention: Convention) -> f64 {
        match convention {
            Convention::NONE => f64::INFINITY,
            Convention::ITERATOR => self.iterator_factor,
            Convention::COMPILED => self.compiled_factor,
            Convention::COMPILED_RECORD => self.compiled_record_factor,
            Convention::FEDERATED => self.federated_factor,
            _ => self.iterator_factor,
        }
    }
}

impl CostModel for DefaultCostModel {
    fn compute_cost(
        &self,
        op: &Operator,
        convention: Convention,
        input_stats: &[&Statistics],
        children_costs: &[Cost],
    ) -> Cost {
        if convention.is_none() {
            return Cost::infinite();
        }
        let children_total: f64 = children_costs.iter().map(|c| c.total).sum();
        let input_rows = input_stats.first().map(|s| s.row_count).unwrap_or(1000.0);

        let local = match op {
            Operator::Values { rows, .. } => self.cpu_weight * rows.len() as f64,
            // Scans carry no input stats; the search passes the group's own stats.
            Operator::Scan { .. } => self.cpu_weight * input_rows,
            Operator::Filter { .. } => self.cpu_weight * input_rows,
            Operator::Project { exprs, .. } => {
                self.cpu_weight * input_rows * (1.0 + exprs.len() as f64 * 0.1)
            }
            // Nested loops: every left row is compared with every right row.
            Operator::Join { .. } => {
                let right_rows = input_stats.get(1).map(|s| s.row_count).unwrap_or(1000.0);
                self.cpu_weight * (input_rows + input_rows * right_rows)
            }
            Operator::Sort { .. } => {
                let n_log_n = if input_rows > 1.0 {
                    input_rows * input_rows.log2()
                } else {
                    1.0
                };
                let bytes = input_stats.first().map(|s| s.total_size_bytes).unwrap_or(0.0);
                self.cpu_weight * n_log_n + self.memory_weight * bytes
            }
            Operator::Limit { offset, count } => {
                self.cpu_weight * input_rows.min(offset.saturating_add(*count) as f64)
            }
            Operator::Converter { .. } => 0.0,
        };

        Cost::new(children_total + local * self.convention_factor(convention))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn test_compiled_is_cheaper_than_iterator() {
        let model = DefaultCostModel::default();
        let input = Statistics::new(1000.0, 8000.0);
        let filter = Operator::Filter {
            predicate: Expr::lit(true),
        };
        let iter = model.compute_cost(&filter, Convention::ITERATOR, &[&input], &[Cost::new(10.0)]);
        let compiled = model.compute_cost(&filter, Convention::COMPILED, &[&input], &[Cost::new(10.0)]);
        assert!(compiled.total < iter.total);
        assert!(compiled.total >= 10.0);
    }

    #[test]
    fn test_logical_operators_cost_infinity() {
        let model = DefaultCostModel::default();
        let cost = model.compute_cost(
            &Operator::Limit { offset: 0, count: 1 },
            Convention::NONE,
            &[&Statistics::new(10.0, 80.0)],
            &[Cost::zero()],
        );
        assert!(cost.is_infinite());
    }
}
