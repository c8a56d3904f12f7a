//! Scalar evaluation shared by iterator pipelines and generated programs.
//!
//! NULL handling follows SQL: arithmetic and comparisons with a NULL operand yield
//! NULL, AND/OR are three-valued, and a filter keeps a row only when its predicate is
//! exactly TRUE.

use crate::error::ExecError;
use ordered_float::OrderedFloat;
use relx_core::expr::{BinaryOp, Expr, ScalarValue, SortKey, UnaryOp};
use std::cmp::Ordering;

pub type Row = Vec<ScalarValue>;

/// Evaluate `expr` against a positional row.
pub fn eval(expr: &Expr, row: &[ScalarValue]) -> Result<ScalarValue, ExecError> {
    match expr {
        Expr::Column(c) => row
            .get(c.index as usize)
            .cloned()
            .ok_or(ExecError::ColumnOutOfRange {
                index: c.index,
                width: row.len(),
            }),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::BinaryOp { op, left, right } => binary(*op, eval(left, row)?, eval(right, row)?),
        Expr::UnaryOp { op, operand } => unary(*op, eval(operand, row)?),
        Expr::Function { name, args } => {
            let args = args
                .iter()
                .map(|a| eval(a, row))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, args)
        }
        Expr::And(exprs) => and(exprs.iter().map(|e| eval(e, row))),
        Expr::Or(exprs) => or(exprs.iter().map(|e| eval(e, row))),
    }
}

pub fn is_true(value: &ScalarValue) -> bool {
    matches!(value, ScalarValue::Bool(true))
}

fn mismatch(what: impl std::fmt::Display, values: &[&ScalarValue]) -> ExecError {
    let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    ExecError::TypeMismatch(format!("{what} on {}", values.join(", ")))
}

pub fn binary(op: BinaryOp, left: ScalarValue, right: ScalarValue) -> Result<ScalarValue, ExecError> {
    if matches!(left, ScalarValue::Null) || matches!(right, ScalarValue::Null) {
        return Ok(ScalarValue::Null);
    }
    let ordering = || compare(&left, &right).ok_or_else(|| mismatch(op, &[&left, &right]));
    let holds = match op {
        BinaryOp::Eq => ordering()? == Ordering::Equal,
        BinaryOp::NotEq => ordering()? != Ordering::Equal,
        BinaryOp::Lt => ordering()? == Ordering::Less,
        BinaryOp::LtEq => ordering()? != Ordering::Greater,
        BinaryOp::Gt => ordering()? == Ordering::Greater,
        BinaryOp::GtEq => ordering()? != Ordering::Less,
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            return arithmetic(op, &left, &right);
        }
    };
    Ok(ScalarValue::Bool(holds))
}

fn arithmetic(op: BinaryOp, left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue, ExecError> {
    if let (ScalarValue::Int64(a), ScalarValue::Int64(b)) = (left, right) {
        let result = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            _ => {
                if *b == 0 {
                    return Err(ExecError::DivisionByZero);
                }
                a.checked_div(*b)
            }
        };
        return result.map(ScalarValue::Int64).ok_or(ExecError::Overflow);
    }
    let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
        return Err(mismatch(op, &[left, right]));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        _ => a / b,
    };
    Ok(ScalarValue::Float64(OrderedFloat(result)))
}

fn as_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Int64(v) => Some(*v as f64),
        ScalarValue::Float64(v) => Some(v.0),
        _ => None,
    }
}

/// Order two non-NULL values of compatible types.
pub fn compare(left: &ScalarValue, right: &ScalarValue) -> Option<Ordering> {
    match (left, right) {
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Some(a.cmp(b)),
        (ScalarValue::Float64(a), ScalarValue::Float64(b)) => Some(a.cmp(b)),
        (ScalarValue::Int64(_), ScalarValue::Float64(_)) | (ScalarValue::Float64(_), ScalarValue::Int64(_)) => {
            as_f64(left)?.partial_cmp(&as_f64(right)?)
        }
        (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
        (ScalarValue::Bool(a), ScalarValue::Bool(b)) => Some(a.cmp(b)),
        (ScalarValue::Date(a), ScalarValue::Date(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

pub fn unary(op: UnaryOp, value: ScalarValue) -> Result<ScalarValue, ExecError> {
    match (op, &value) {
        (UnaryOp::IsNull, v) => Ok(ScalarValue::Bool(matches!(v, ScalarValue::Null))),
        (UnaryOp::IsNotNull, v) => Ok(ScalarValue::Bool(!matches!(v, ScalarValue::Null))),
        (_, ScalarValue::Null) => Ok(ScalarValue::Null),
        (UnaryOp::Not, ScalarValue::Bool(b)) => Ok(ScalarValue::Bool(!b)),
        (UnaryOp::Neg, ScalarValue::Int64(v)) => v.checked_neg().map(ScalarValue::Int64).ok_or(ExecError::Overflow),
        (UnaryOp::Neg, ScalarValue::Float64(v)) => Ok(ScalarValue::Float64(-*v)),
        _ => Err(mismatch(format!("{op:?}"), &[&value])),
    }
}

/// Three-valued conjunction.
pub fn and(values: impl IntoIterator<Item = Result<ScalarValue, ExecError>>) -> Result<ScalarValue, ExecError> {
    let mut saw_null = false;
    for value in values {
        match value? {
            ScalarValue::Bool(false) => return Ok(ScalarValue::Bool(false)),
            ScalarValue::Bool(true) => {}
            ScalarValue::Null => saw_null = true,
            other => return Err(mismatch("AND", &[&other])),
        }
    }
    Ok(if saw_null { ScalarValue::Null } else { ScalarValue::Bool(true) })
}

/// Three-valued disjunction.
pub fn or(values: impl IntoIterator<Item = Result<ScalarValue, ExecError>>) -> Result<ScalarValue, ExecError> {
    let mut saw_null = false;
    for value in values {
        match value? {
            ScalarValue::Bool(true) => return Ok(ScalarValue::Bool(true)),
            ScalarValue::Bool(false) => {}
            ScalarValue::Null => saw_null = true,
            other => return Err(mismatch("OR", &[&other])),
        }
    }
    Ok(if saw_null { ScalarValue::Null } else { ScalarValue::Bool(false) })
}

/// Built-in scalar functions.
pub fn call(name: &str, args: Vec<ScalarValue>) -> Result<ScalarValue, ExecError> {
    match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("coalesce", args) => Ok(args
            .iter()
            .find(|v| !matches!(v, ScalarValue::Null))
            .cloned()
            .unwrap_or(ScalarValue::Null)),
        (_, [ScalarValue::Null]) => Ok(ScalarValue::Null),
        ("upper", [ScalarValue::Utf8(s)]) => Ok(ScalarValue::Utf8(s.to_uppercase())),
        ("lower", [ScalarValue::Utf8(s)]) => Ok(ScalarValue::Utf8(s.to_lowercase())),
        ("length", [ScalarValue::Utf8(s)]) => Ok(ScalarValue::Int64(s.chars().count() as i64)),
        ("abs", [ScalarValue::Int64(v)]) => v.checked_abs().map(ScalarValue::Int64).ok_or(ExecError::Overflow),
        ("abs", [ScalarValue::Float64(v)]) => Ok(ScalarValue::Float64(OrderedFloat(v.0.abs()))),
        ("upper" | "lower" | "length" | "abs", args) => {
            Err(mismatch(name, &args.iter().collect::<Vec<_>>()))
        }
        _ => Err(ExecError::UnknownFunction(name.to_string())),
    }
}

/// Sort rows by `order`. Keys are evaluated once per row.
pub fn sort_rows(rows: Vec<Row>, order: &[SortKey]) -> Result<Vec<Row>, ExecError> {
    let mut keyed = rows
        .into_iter()
        .map(|row| {
            let key = order
                .iter()
                .map(|k| eval(&k.expr, &row))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((key, row))
        })
        .collect::<Result<Vec<_>, ExecError>>()?;

    keyed.sort_by(|(a, _), (b, _)| {
        for ((x, y), key) in a.iter().zip(b).zip(order) {
            let ord = match (x, y) {
                (ScalarValue::Null, ScalarValue::Null) => Ordering::Equal,
                (ScalarValue::Null, _) if key.nulls_first => return Ordering::Less,
                (ScalarValue::Null, _) => return Ordering::Greater,
                (_, ScalarValue::Null) if key.nulls_first => return Ordering::Greater,
                (_, ScalarValue::Null) => return Ordering::Less,
                _ => compare(x, y).unwrap_or(Ordering::Equal),
            };
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_propagation_and_three_valued_logic() {
        assert_eq!(binary(BinaryOp::Add, ScalarValue::Null, 1.into()).unwrap(), ScalarValue::Null);
        assert_eq!(
            and([Ok(ScalarValue::Null), Ok(false.into())]).unwrap(),
            ScalarValue::Bool(false)
        );
        assert_eq!(and([Ok(ScalarValue::Null), Ok(true.into())]).unwrap(), ScalarValue::Null);
        assert_eq!(or([Ok(ScalarValue::Null), Ok(true.into())]).unwrap(), ScalarValue::Bool(true));
    }

    #[test]
    fn test_mixed_arithmetic_and_errors() {
        assert_eq!(
            binary(BinaryOp::Mul, 2.into(), 1.5.into()).unwrap(),
            ScalarValue::Float64(OrderedFloat(3.0))
        );
        assert_eq!(binary(BinaryOp::Div, 1.into(), 0.into()), Err(ExecError::DivisionByZero));
        assert_eq!(binary(BinaryOp::Add, i64::MAX.into(), 1.into()), Err(ExecError::Overflow));
        assert!(matches!(
            binary(BinaryOp::Lt, "a".into(), 1.into()),
            Err(ExecError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_sort_descending_nulls_last() {
        let rows = vec![vec![1.into()], vec![ScalarValue::Null], vec![3.into()]];
        let order = [SortKey {
            expr: Expr::col("x", 0),
            ascending: false,
            nulls_first: false,
        }];
        let sorted = sort_rows(rows, &order).unwrap();
        assert_eq!(sorted, vec![vec![3.into()], vec![1.into()], vec![ScalarValue::Null]]);
    }
}
