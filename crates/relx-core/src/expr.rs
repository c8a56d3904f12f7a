//! # Expression, Row Type and Operator Types
//!
//! This module defines the plan representation shared by the memo, the rules and the
//! code generator. It is organized into three layers:
//!
//! ## Scalar Expressions (`Expr`)
//! Computations on individual rows: column references (by ordinal), literals,
//! arithmetic and comparisons, boolean logic and opaque function calls. They appear in
//! filter predicates, projections, join conditions and sort keys.
//!
//! ## Row Types (`RowType`)
//! The ordered, named, typed column signature of a relation. Row types are resolved by
//! whoever builds the logical plan; the planner only propagates them and compares them
//! for equality. A row type never depends on convention.
//!
//! ## Operators (`Operator`)
//! A single tagged variant covers every relational operator. Whether a node is logical
//! or physical is decided by its calling convention, not by its operator: a `Filter`
//! in `NONE` is the logical filter, the same `Filter` in `ITERATOR` is the pull-based
//! implementation. `OpKind` strips the payload so rules can match on operator type.

use crate::convention::Convention;
use crate::error::OptimizationError;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to a table owned by a catalog or a federated source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Reference to an input column. `index` is the ordinal in the input row; `name` is
/// kept for display and statistics lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    pub index: u32,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            table: None,
            name: name.into(),
            index,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.table {
            write!(f, "{}.{}", t, self.name)
        } else {
            write!(f, "${}", self.index)
        }
    }
}

/// Constant values.
///
/// `Float64` is wrapped in `OrderedFloat` so operators holding literals can be hashed
/// and compared for memo deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{}", v.0),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Date(v) => write!(f, "DATE({v})"),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(OrderedFloat(v))
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(v.to_string())
    }
}

/// Scalar expressions used in predicates, projections, join conditions and sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    Literal(ScalarValue),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Named function call. Opaque to the planner.
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// Conjunction stored flat to simplify decomposition.
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn col(name: impl Into<String>, index: u32) -> Self {
        Expr::Column(ColumnRef::new(name, index))
    }

    pub fn lit(value: impl Into<ScalarValue>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Return all column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Combine predicates into a single conjunction (`TRUE` when empty).
    pub fn conjunction(mut predicates: Vec<Expr>) -> Expr {
        match predicates.len() {
            0 => Expr::Literal(ScalarValue::Bool(true)),
            1 => predicates.remove(0),
            _ => Expr::And(predicates),
        }
    }

    /// Rewrite every column ordinal through `f`.
    pub fn map_columns(&self, f: &impl Fn(u32) -> u32) -> Expr {
        match self {
            Expr::Column(c) => Expr::Column(ColumnRef {
                index: f(c.index),
                ..c.clone()
            }),
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
                op: *op,
                left: Box::new(left.map_columns(f)),
                right: Box::new(right.map_columns(f)),
            },
            Expr::UnaryOp { op, operand } => Expr::UnaryOp {
                op: *op,
                operand: Box::new(operand.map_columns(f)),
            },
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.map_columns(f)).collect(),
            },
            Expr::And(exprs) => Expr::And(exprs.iter().map(|e| e.map_columns(f)).collect()),
            Expr::Or(exprs) => Expr::Or(exprs.iter().map(|e| e.map_columns(f)).collect()),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                let sep = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                f.write_str("(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// Join types. Only inner joins are commutative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    /// Matching rows from both sides.
    Inner,
    /// All rows from the left side, NULL-padded where the right side has no match.
    Left,
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
    pub nulls_first: bool,
}

/// Column data types. The planner compares them, it never checks expressions
/// against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    Date,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int64 => "BIGINT",
            DataType::Float64 => "DOUBLE",
            DataType::Utf8 => "VARCHAR",
            DataType::Date => "DATE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }
}

/// Ordered column signature of a relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowType {
    pub fields: Vec<Field>,
}

impl RowType {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Concatenate two row types (join output). `nullable_right` marks the right side
    /// nullable, as for LEFT joins.
    pub fn join(&self, right: &RowType, nullable_right: bool) -> RowType {
        let mut fields = self.fields.clone();
        fields.extend(right.fields.iter().map(|f| Field {
            nullable: f.nullable || nullable_right,
            ..f.clone()
        }));
        RowType { fields }
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", field.name, field.data_type)?;
        }
        f.write_str(")")
    }
}

/// Relational operators.
///
/// Children are not stored here; the memo keeps them as group references next to the
/// operator. The only convention-specific variant is `Converter`, whose target
/// convention is the node's own convention and whose `from` is the convention
/// required of its single input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    /// Literal rows. Leaf.
    Values {
        row_type: RowType,
        rows: Vec<Vec<ScalarValue>>,
    },
    /// Table access. Leaf.
    Scan { table: TableRef, row_type: RowType },
    /// Keeps the rows for which `predicate` is true.
    Filter { predicate: Expr },
    /// Computes `exprs` per input row; `row_type` names and types the outputs.
    Project { exprs: Vec<Expr>, row_type: RowType },
    /// Joins two inputs. Column ordinals in `condition` address the concatenated row.
    Join { join_type: JoinType, condition: Expr },
    Sort { order: Vec<SortKey> },
    Limit { offset: u64, count: u64 },
    /// Changes convention from `from` to the node's own convention.
    Converter { from: Convention },
}

/// Operator discriminant used by patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Values,
    Scan,
    Filter,
    Project,
    Join,
    Sort,
    Limit,
    Converter,
}

impl Operator {
    pub fn kind(&self) -> OpKind {
        match self {
            Operator::Values { .. } => OpKind::Values,
            Operator::Scan { .. } => OpKind::Scan,
            Operator::Filter { .. } => OpKind::Filter,
            Operator::Project { .. } => OpKind::Project,
            Operator::Join { .. } => OpKind::Join,
            Operator::Sort { .. } => OpKind::Sort,
            Operator::Limit { .. } => OpKind::Limit,
            Operator::Converter { .. } => OpKind::Converter,
        }
    }

    /// Number of inputs the operator takes.
    pub fn arity(&self) -> usize {
        match self {
            Operator::Values { .. } | Operator::Scan { .. } => 0,
            Operator::Join { .. } => 2,
            _ => 1,
        }
    }

    /// Derive the output row type from the input row types.
    pub fn derive_row_type(&self, inputs: &[&RowType]) -> Result<RowType, OptimizationError> {
        if inputs.len() != self.arity() {
            return Err(OptimizationError::InvalidExpression {
                kind: self.kind(),
                expected: self.arity(),
                actual: inputs.len(),
            });
        }
        Ok(match self {
            Operator::Values { row_type, .. }
            | Operator::Scan { row_type, .. }
            | Operator::Project { row_type, .. } => row_type.clone(),
            Operator::Join { join_type, .. } => {
                inputs[0].join(inputs[1], *join_type == JoinType::Left)
            }
            Operator::Filter { .. }
            | Operator::Sort { .. }
            | Operator::Limit { .. }
            | Operator::Converter { .. } => inputs[0].clone(),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Values { rows, .. } => write!(f, "Values[{} rows]", rows.len()),
            Operator::Scan { table, .. } => write!(f, "Scan[{table}]"),
            Operator::Filter { predicate } => write!(f, "Filter[{predicate}]"),
            Operator::Project { exprs, row_type } => {
                f.write_str("Project[")?;
                for (i, (e, field)) in exprs.iter().zip(&row_type.fields).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} := {e}", field.name)?;
                }
                f.write_str("]")
            }
            Operator::Join {
                join_type,
                condition,
            } => write!(f, "Join[{join_type:?}, {condition}]"),
            Operator::Sort { order } => {
                f.write_str("Sort[")?;
                for (i, k) in order.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {}", k.expr, if k.ascending { "ASC" } else { "DESC" })?;
                }
                f.write_str("]")
            }
            Operator::Limit { offset, count } => write!(f, "Limit[{offset}, {count}]"),
            Operator::Converter { from } => write!(f, "Converter[from {from}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ab() -> RowType {
        RowType::new(vec![
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::Utf8),
        ])
    }

    #[test]
    fn test_join_row_type_marks_right_nullable_for_left_join() {
        let mut right = RowType::new(vec![Field::new("c", DataType::Int64)]);
        right.fields[0].nullable = false;
        let op = Operator::Join {
            join_type: JoinType::Left,
            condition: Expr::lit(true),
        };
        let out = op.derive_row_type(&[&ab(), &right]).unwrap();
        assert_eq!(out.names(), vec!["a", "b", "c"]);
        assert!(out.fields[2].nullable);
    }

    #[test]
    fn test_arity_is_checked() {
        let op = Operator::Filter {
            predicate: Expr::lit(true),
        };
        let err = op.derive_row_type(&[]).unwrap_err();
        assert!(matches!(
            err,
            OptimizationError::InvalidExpression { expected: 1, actual: 0, .. }
        ));
    }

    #[test]
    fn test_map_columns_shifts_ordinals() {
        let cond = Expr::binary(BinaryOp::Eq, Expr::col("a", 0), Expr::col("c", 2));
        let shifted = cond.map_columns(&|i| i + 1);
        let idx: Vec<u32> = shifted.columns().iter().map(|c| c.index).collect();
        assert_eq!(idx, vec![1, 3]);
    }
}
