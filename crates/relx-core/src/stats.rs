//! # Group Statistics
//!
//! Row-count estimates drive the cost of every operator and, through
//! [`crate::convertlet::Convertlet::estimated_cost`], the price of each conversion
//! between calling conventions. They are derived once per memo group from a
//! representative logical expression:
//!
//! | Operator | Output rows |
//! |----------|-------------|
//! | Values   | exact, with per-column NDV and null fraction counted from the literal rows |
//! | Scan     | catalog statistics |
//! | Filter   | input * selectivity |
//! | Project  | input; statistics follow plain column references to their new names |
//! | Join     | left * right / max(NDV(left key), NDV(right key)) |
//! | Limit    | min(input - offset, count) |
//!
//! Selectivity: equality 1 / NDV; ranges interpolate between the column's min and max
//! when both are known, 1/3 otherwise; anything else 0.1.

use crate::expr::{BinaryOp, Expr, RowType, ScalarValue};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Statistics for a relation (or group in the memo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            column_stats: HashMap::new(),
        }
    }

    /// Fallback used when nothing is known about a relation.
    pub fn unknown() -> Self {
        Self::new(1000.0, 100_000.0)
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }

    fn avg_row_size(&self) -> f64 {
        if self.row_count > 0.0 {
            self.total_size_bytes / self.row_count
        } else {
            100.0
        }
    }
}

/// Per-column statistics used for selectivity estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV).
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    pub null_fraction: f64,
    pub min_value: Option<ScalarValue>,
    pub max_value: Option<ScalarValue>,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
            min_value: None,
            max_value: None,
        }
    }
}

/// Exact statistics for an inline relation.
pub fn derive_values_stats(row_type: &RowType, rows: &[Vec<ScalarValue>]) -> Statistics {
    let row_count = rows.len() as f64;
    let mut out = Statistics::new(row_count, row_count * 8.0 * row_type.len() as f64);
    if rows.is_empty() {
        return out;
    }
    for (i, field) in row_type.fields.iter().enumerate() {
        let column = rows.iter().filter_map(|row| row.get(i));
        let nulls = column.clone().filter(|v| matches!(v, ScalarValue::Null)).count();
        let distinct: HashSet<&ScalarValue> = column.clone().filter(|v| !matches!(v, ScalarValue::Null)).collect();
        let mut cs = ColumnStatistics::new(distinct.len() as f64, nulls as f64 / row_count);
        let numeric = column.filter_map(|v| numeric(v).map(|n| (n, v)));
        cs.min_value = numeric.clone().min_by(|a, b| a.0.total_cmp(&b.0)).map(|(_, v)| v.clone());
        cs.max_value = numeric.max_by(|a, b| a.0.total_cmp(&b.0)).map(|(_, v)| v.clone());
        out.column_stats.insert(field.name.clone(), cs);
    }
    out
}

/// Carry column statistics through a projection. Only bare column references keep
/// their statistics; computed columns get none.
pub fn derive_project_stats(input: &Statistics, exprs: &[Expr], output: &RowType) -> Statistics {
    let mut out = Statistics::new(input.row_count, input.row_count * input.avg_row_size());
    for (expr, field) in exprs.iter().zip(&output.fields) {
        if let Expr::Column(c) = expr {
            if let Some(cs) = input.column_stats.get(&c.name) {
                out.column_stats.insert(field.name.clone(), cs.clone());
            }
        }
    }
    out
}

/// Derive statistics for join output.
///
/// ```text
/// |A JOIN B| = |A| * |B| / max(NDV(A.key), NDV(B.key))
/// ```
///
/// Multi-column joins multiply the per-pair selectivities. Without NDV information a
/// side's row count is used as its NDV.
pub fn derive_join_stats(
    left: &Statistics,
    right: &Statistics,
    join_columns: &[(String, String)],
) -> Statistics {
    let mut selectivity = 1.0_f64;
    for (left_col, right_col) in join_columns {
        let left_ndv = left
            .column_stats
            .get(left_col)
            .map(|s| s.distinct_count)
            .unwrap_or(left.row_count);
        let right_ndv = right
            .column_stats
            .get(right_col)
            .map(|s| s.distinct_count)
            .unwrap_or(right.row_count);
        selectivity /= left_ndv.max(right_ndv).max(1.0);
    }

    let row_count = (left.row_count * right.row_count * selectivity).max(1.0);
    let total_size_bytes = row_count * (left.avg_row_size() + right.avg_row_size());

    let mut column_stats = HashMap::new();
    for (name, stats) in left.column_stats.iter().chain(&right.column_stats) {
        let mut cs = stats.clone();
        cs.distinct_count = cs.distinct_count.min(row_count);
        column_stats.insert(name.clone(), cs);
    }

    Statistics {
        row_count,
        total_size_bytes,
        column_stats,
    }
}

/// Derive statistics for filter output.
pub fn derive_filter_stats(input: &Statistics, selectivity: f64) -> Statistics {
    let row_count = (input.row_count * selectivity).max(1.0);
    let ratio = if input.row_count > 0.0 {
        row_count / input.row_count
    } else {
        1.0
    };

    let mut column_stats = HashMap::new();
    for (name, stats) in &input.column_stats {
        let mut cs = stats.clone();
        cs.distinct_count = (cs.distinct_count * ratio).max(1.0).min(row_count);
        column_stats.insert(name.clone(), cs);
    }

    Statistics {
        row_count,
        total_size_bytes: input.total_size_bytes * ratio,
        column_stats,
    }
}

/// Derive statistics for limit output.
pub fn derive_limit_stats(input: &Statistics, offset: u64, count: u64) -> Statistics {
    let row_count = (input.row_count - offset as f64).clamp(0.0, count as f64);
    let mut out = input.clone();
    out.total_size_bytes = row_count * input.avg_row_size();
    out.row_count = row_count;
    for cs in out.column_stats.values_mut() {
        cs.distinct_count = cs.distinct_count.min(row_count.max(1.0));
    }
    out
}

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of range comparisons.
pub const RANGE_SELECTIVITY: f64 = 0.33;

fn numeric(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Int64(v) => Some(*v as f64),
        ScalarValue::Float64(v) => Some(v.0),
        ScalarValue::Date(v) => Some(f64::from(*v)),
        _ => None,
    }
}

/// Selectivity of `column <op> value` by linear interpolation over [min, max].
/// Falls back to [`RANGE_SELECTIVITY`] without numeric bounds.
pub fn range_selectivity(stats: &Statistics, col_name: &str, op: BinaryOp, value: &ScalarValue) -> f64 {
    let bounds = stats.column_stats.get(col_name).and_then(|cs| {
        let lo = numeric(cs.min_value.as_ref()?)?;
        let hi = numeric(cs.max_value.as_ref()?)?;
        Some((lo, hi))
    });
    let (Some((lo, hi)), Some(v)) = (bounds, numeric(value)) else {
        return RANGE_SELECTIVITY;
    };
    if hi <= lo {
        return RANGE_SELECTIVITY;
    }
    let below = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);
    match op {
        BinaryOp::Lt | BinaryOp::LtEq => below,
        BinaryOp::Gt | BinaryOp::GtEq => 1.0 - below,
        _ => RANGE_SELECTIVITY,
    }
}

/// Estimate selectivity for an equality predicate: `sel = 1 / NDV`.
pub fn equality_selectivity(stats: &Statistics, col_name: &str) -> f64 {
    stats
        .column_stats
        .get(col_name)
        .map(|cs| 1.0 / cs.distinct_count.max(1.0))
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}
