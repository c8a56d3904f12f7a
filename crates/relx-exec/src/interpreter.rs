//! # Fragment Interpreter
//!
//! Runs an [`ExecutableFragment`] against a [`RowSource`].
//!
//! Pipelines are lazy boxed iterators; sorts and the right side of a nested loop
//! join are buffered. Programs run statement by statement over a stack of scopes:
//! `while` and `if` bodies get their own scope, so a `let` inside a loop body is
//! rebound on every iteration and a cursor opened there is re-opened per outer row.

use crate::error::ExecError;
use crate::eval::{self, Row};
use crate::source::RowSource;
use relx_core::expr::{Expr, JoinType, ScalarValue};
use relx_core::fragment::{CodeExpr, ExecutableFragment, IterPlan, Stmt, Var};
use std::collections::HashMap;
use std::iter::Peekable;
use tracing::trace;

pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Row, ExecError>> + 'a>;

/// A runtime value of generated code.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(ScalarValue),
    Row(Row),
    Record(Vec<(String, ScalarValue)>),
}

enum Slot<'a> {
    Value(Value),
    Cursor(Peekable<RowIter<'a>>),
}

struct Env<'a> {
    scopes: Vec<HashMap<Var, Slot<'a>>>,
}

impl<'a> Env<'a> {
    fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, var: Var, slot: Slot<'a>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(var, slot);
        }
    }

    fn value(&self, var: Var) -> Result<&Value, ExecError> {
        match self.scopes.iter().rev().find_map(|s| s.get(&var)) {
            Some(Slot::Value(v)) => Ok(v),
            Some(Slot::Cursor(_)) => Err(ExecError::TypeMismatch(format!("{var} is a cursor"))),
            None => Err(ExecError::UnboundVariable(var)),
        }
    }

    fn cursor(&mut self, var: Var) -> Result<&mut Peekable<RowIter<'a>>, ExecError> {
        match self.scopes.iter_mut().rev().find_map(|s| s.get_mut(&var)) {
            Some(Slot::Cursor(c)) => Ok(c),
            Some(Slot::Value(_)) => Err(ExecError::TypeMismatch(format!("{var} is not a cursor"))),
            None => Err(ExecError::UnboundVariable(var)),
        }
    }
}

pub struct Interpreter<'a> {
    source: &'a dyn RowSource,
}

impl<'a> Interpreter<'a> {
    pub fn new(source: &'a dyn RowSource) -> Self {
        Self { source }
    }

    /// Run to completion and collect the output rows.
    pub fn run(&self, fragment: &'a ExecutableFragment) -> Result<Vec<Row>, ExecError> {
        match fragment {
            ExecutableFragment::Pipeline(plan) => self.pipeline(plan)?.collect(),
            ExecutableFragment::Program(stmts) => self.program(stmts),
        }
    }

    pub fn pipeline(&self, plan: &'a IterPlan) -> Result<RowIter<'a>, ExecError> {
        Ok(match plan {
            IterPlan::Values { rows } => Box::new(rows.iter().cloned().map(Ok)),
            IterPlan::Scan { table } | IterPlan::Fetch { table } => {
                trace!("Reading {table}");
                Box::new(self.source.rows(table)?.into_iter().map(Ok))
            }
            IterPlan::Filter { input, predicate } => {
                let input = self.pipeline(input)?;
                Box::new(input.filter_map(move |row| {
                    let row = match row {
                        Ok(row) => row,
                        Err(e) => return Some(Err(e)),
                    };
                    match eval::eval(predicate, &row) {
                        Ok(v) if eval::is_true(&v) => Some(Ok(row)),
                        Ok(_) => None,
                        Err(e) => Some(Err(e)),
                    }
                }))
            }
            IterPlan::Project { input, exprs } => {
                let input = self.pipeline(input)?;
                Box::new(input.map(move |row| {
                    let row = row?;
                    exprs.iter().map(|e| eval::eval(e, &row)).collect()
                }))
            }
            IterPlan::NestedLoopJoin {
                left,
                right,
                join_type,
                condition,
                right_width,
            } => {
                let right_rows = self.pipeline(right)?.collect::<Result<Vec<_>, _>>()?;
                let left = self.pipeline(left)?;
                let (join_type, right_width) = (*join_type, *right_width);
                Box::new(left.flat_map(move |l| match l {
                    Ok(l) => join_row(l, &right_rows, join_type, condition, right_width),
                    Err(e) => vec![Err(e)],
                }))
            }
            IterPlan::Sort { input, order } => {
                let rows = self.pipeline(input)?.collect::<Result<Vec<_>, _>>()?;
                Box::new(eval::sort_rows(rows, order)?.into_iter().map(Ok))
            }
            IterPlan::Limit { input, offset, count } => {
                let input = self.pipeline(input)?;
                let offset = usize::try_from(*offset).unwrap_or(usize::MAX);
                let count = usize::try_from(*count).unwrap_or(usize::MAX);
                Box::new(input.skip(offset).take(count))
            }
            IterPlan::Materialize { program } => Box::new(self.program(program)?.into_iter().map(Ok)),
        })
    }

    fn program(&self, stmts: &'a [Stmt]) -> Result<Vec<Row>, ExecError> {
        let mut env = Env::new();
        let mut out = Vec::new();
        self.exec(stmts, &mut env, &mut out)?;
        Ok(out)
    }

    fn exec(&self, stmts: &'a [Stmt], env: &mut Env<'a>, out: &mut Vec<Row>) -> Result<(), ExecError> {
        for stmt in stmts {
            match stmt {
                Stmt::Let { var, value } => {
                    let value = eval_code(value, env)?;
                    env.bind(*var, Slot::Value(value));
                }
                Stmt::Open { cursor, source } => {
                    let rows = self.pipeline(source)?;
                    env.bind(*cursor, Slot::Cursor(rows.peekable()));
                }
                Stmt::While { cond, body } => {
                    while is_true(cond, env)? {
                        self.scoped(body, env, out)?;
                    }
                }
                Stmt::If { cond, then } => {
                    if is_true(cond, env)? {
                        self.scoped(then, env, out)?;
                    }
                }
                Stmt::Splice => return Err(ExecError::UnfilledHole),
                Stmt::Emit(expr) => out.push(into_row(eval_code(expr, env)?)),
            }
        }
        Ok(())
    }

    fn scoped(&self, stmts: &'a [Stmt], env: &mut Env<'a>, out: &mut Vec<Row>) -> Result<(), ExecError> {
        env.push();
        let result = self.exec(stmts, env, out);
        env.pop();
        result
    }
}

fn join_row(
    left: Row,
    right_rows: &[Row],
    join_type: JoinType,
    condition: &Expr,
    right_width: usize,
) -> Vec<Result<Row, ExecError>> {
    let mut out = Vec::new();
    for right in right_rows {
        let mut joined = left.clone();
        joined.extend(right.iter().cloned());
        match eval::eval(condition, &joined) {
            Ok(v) if eval::is_true(&v) => out.push(Ok(joined)),
            Ok(_) => {}
            Err(e) => return vec![Err(e)],
        }
    }
    if out.is_empty() && join_type == JoinType::Left {
        let mut padded = left;
        padded.extend(std::iter::repeat(ScalarValue::Null).take(right_width));
        out.push(Ok(padded));
    }
    out
}

fn into_row(value: Value) -> Row {
    match value {
        Value::Row(row) => row,
        Value::Record(fields) => fields.into_iter().map(|(_, v)| v).collect(),
        Value::Scalar(v) => vec![v],
    }
}

fn is_true(cond: &CodeExpr, env: &mut Env<'_>) -> Result<bool, ExecError> {
    Ok(matches!(eval_code(cond, env)?, Value::Scalar(ScalarValue::Bool(true))))
}

fn scalar(value: Value) -> Result<ScalarValue, ExecError> {
    match value {
        Value::Scalar(v) => Ok(v),
        other => Err(ExecError::TypeMismatch(format!("expected a scalar, got {other:?}"))),
    }
}

fn eval_scalars(exprs: &[CodeExpr], env: &mut Env<'_>) -> Result<Vec<ScalarValue>, ExecError> {
    exprs.iter().map(|e| eval_code(e, env).and_then(scalar)).collect()
}

fn eval_code(expr: &CodeExpr, env: &mut Env<'_>) -> Result<Value, ExecError> {
    Ok(match expr {
        CodeExpr::Var(var) => env.value(*var)?.clone(),
        CodeExpr::Literal(v) => Value::Scalar(v.clone()),
        CodeExpr::Field { row, index } => match eval_code(row, env)? {
            Value::Row(values) => {
                let width = values.len();
                let value = values.into_iter().nth(*index as usize).ok_or(ExecError::ColumnOutOfRange {
                    index: *index,
                    width,
                })?;
                Value::Scalar(value)
            }
            other => return Err(ExecError::TypeMismatch(format!("positional access into {other:?}"))),
        },
        CodeExpr::RecordField { record, index, name } => match eval_code(record, env)? {
            Value::Record(fields) => match fields.into_iter().nth(*index as usize) {
                Some((n, v)) if n == *name => Value::Scalar(v),
                _ => return Err(ExecError::UnknownField(name.clone())),
            },
            other => return Err(ExecError::TypeMismatch(format!("field {name} of {other:?}"))),
        },
        CodeExpr::Binary { op, left, right } => {
            let left = scalar(eval_code(left, env)?)?;
            let right = scalar(eval_code(right, env)?)?;
            Value::Scalar(eval::binary(*op, left, right)?)
        }
        CodeExpr::Unary { op, operand } => Value::Scalar(eval::unary(*op, scalar(eval_code(operand, env)?)?)?),
        CodeExpr::And(exprs) => Value::Scalar(eval::and(eval_scalars(exprs, env)?.into_iter().map(Ok))?),
        CodeExpr::Or(exprs) => Value::Scalar(eval::or(eval_scalars(exprs, env)?.into_iter().map(Ok))?),
        CodeExpr::Call { name, args } => Value::Scalar(eval::call(name, eval_scalars(args, env)?)?),
        CodeExpr::MakeRow(exprs) => Value::Row(eval_scalars(exprs, env)?),
        CodeExpr::ToRecord { row, names } => match eval_code(row, env)? {
            Value::Row(values) if values.len() == names.len() => {
                Value::Record(names.iter().cloned().zip(values).collect())
            }
            other => return Err(ExecError::TypeMismatch(format!("cannot view {other:?} as a record"))),
        },
        CodeExpr::ToRow { record, names } => match eval_code(record, env)? {
            Value::Record(fields) if fields.len() == names.len() => {
                let mut row = Vec::with_capacity(fields.len());
                for ((n, v), expected) in fields.into_iter().zip(names) {
                    if n != *expected {
                        return Err(ExecError::UnknownField(expected.clone()));
                    }
                    row.push(v);
                }
                Value::Row(row)
            }
            other => return Err(ExecError::TypeMismatch(format!("cannot flatten {other:?}"))),
        },
        CodeExpr::Concat(left, right) => match (eval_code(left, env)?, eval_code(right, env)?) {
            (Value::Row(mut l), Value::Row(r)) => {
                l.extend(r);
                Value::Row(l)
            }
            (l, r) => return Err(ExecError::TypeMismatch(format!("concat of {l:?} and {r:?}"))),
        },
        CodeExpr::HasNext(cursor) => Value::Scalar(ScalarValue::Bool(env.cursor(*cursor)?.peek().is_some())),
        CodeExpr::Next(cursor) => match env.cursor(*cursor)?.next() {
            Some(row) => Value::Row(row?),
            None => return Err(ExecError::ExhaustedCursor(*cursor)),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryRowSource;
    use relx_core::expr::{BinaryOp, TableRef};

    fn ints(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| vec![ScalarValue::Int64(*v)]).collect()
    }

    #[test]
    fn test_left_join_pads_unmatched_rows() {
        let plan = IterPlan::NestedLoopJoin {
            left: Box::new(IterPlan::Values { rows: ints(&[1, 2]) }),
            right: Box::new(IterPlan::Values { rows: ints(&[2]) }),
            join_type: JoinType::Left,
            condition: Expr::binary(BinaryOp::Eq, Expr::col("a", 0), Expr::col("b", 1)),
            right_width: 1,
        };
        let source = InMemoryRowSource::new();
        let rows: Vec<Row> = Interpreter::new(&source)
            .pipeline(&plan)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![ScalarValue::Int64(1), ScalarValue::Null],
                vec![ScalarValue::Int64(2), ScalarValue::Int64(2)],
            ]
        );
    }

    #[test]
    fn test_program_loops_over_cursor() {
        let table = TableRef::new("s", "t");
        let mut source = InMemoryRowSource::new();
        source.add_table(&table, ints(&[5, 6]));
        let (cursor, row) = (Var(0), Var(1));
        let program = ExecutableFragment::Program(vec![
            Stmt::Open {
                cursor,
                source: IterPlan::Scan { table },
            },
            Stmt::While {
                cond: CodeExpr::HasNext(cursor),
                body: vec![
                    Stmt::Let {
                        var: row,
                        value: CodeExpr::Next(cursor),
                    },
                    Stmt::Emit(CodeExpr::Var(row)),
                ],
            },
        ]);
        assert_eq!(Interpreter::new(&source).run(&program).unwrap(), ints(&[5, 6]));
    }

    #[test]
    fn test_unfilled_hole_is_an_error() {
        let source = InMemoryRowSource::new();
        let program = ExecutableFragment::Program(vec![Stmt::Splice]);
        assert_eq!(Interpreter::new(&source).run(&program), Err(ExecError::UnfilledHole));
    }

    #[test]
    fn test_record_fields_resolve_by_position() {
        // A self-join row: both sides call their column `id`.
        let source = InMemoryRowSource::new();
        let (pair, record) = (Var(0), Var(1));
        let names = vec!["id".to_string(), "id".to_string()];
        let field = |index| CodeExpr::RecordField {
            record: Box::new(CodeExpr::Var(record)),
            index,
            name: "id".into(),
        };
        let program = ExecutableFragment::Program(vec![
            Stmt::Let {
                var: pair,
                value: CodeExpr::MakeRow(vec![
                    CodeExpr::Literal(ScalarValue::Int64(1)),
                    CodeExpr::Literal(ScalarValue::Int64(2)),
                ]),
            },
            Stmt::Let {
                var: record,
                value: CodeExpr::ToRecord {
                    row: Box::new(CodeExpr::Var(pair)),
                    names: names.clone(),
                },
            },
            Stmt::Emit(CodeExpr::MakeRow(vec![field(1), field(0)])),
            Stmt::Emit(CodeExpr::ToRow {
                record: Box::new(CodeExpr::Var(record)),
                names,
            }),
        ]);
        assert_eq!(
            Interpreter::new(&source).run(&program).unwrap(),
            vec![
                vec![ScalarValue::Int64(2), ScalarValue::Int64(1)],
                vec![ScalarValue::Int64(1), ScalarValue::Int64(2)],
            ]
        );
    }

    #[test]
    fn test_loop_scope_hides_inner_bindings() {
        let source = InMemoryRowSource::new();
        let program = ExecutableFragment::Program(vec![
            Stmt::If {
                cond: CodeExpr::Literal(ScalarValue::Bool(true)),
                then: vec![Stmt::Let {
                    var: Var(0),
                    value: CodeExpr::Literal(ScalarValue::Int64(1)),
                }],
            },
            Stmt::Emit(CodeExpr::Var(Var(0))),
        ]);
        assert_eq!(
            Interpreter::new(&source).run(&program),
            Err(ExecError::UnboundVariable(Var(0)))
        );
    }
}
