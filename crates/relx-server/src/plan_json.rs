//! # JSON Plan Protocol
//!
//! Clients send a logical plan as a JSON tree together with the tables it reads.
//! Tables carry statistics for costing and, optionally, inline rows used by
//! `POST /execute`.
//!
//! ```json
//! {
//!   "convention": "COMPILED",
//!   "tables": [{
//!     "schema": "app", "name": "orders", "rowCount": 3,
//!     "columns": [{"name": "id", "type": "Int64"}, {"name": "amount", "type": "Int64"}],
//!     "rows": [[1, 5], [2, 50], [3, 500]]
//!   }],
//!   "plan": {
//!     "op": "filter",
//!     "predicate": {"kind": "binary", "op": ">", "left": {"kind": "column", "index": 1},
//!                   "right": {"kind": "literal", "value": 10}},
//!     "input": {"op": "scan", "schema": "app", "table": "orders"}
//!   }
//! }
//! ```
//!
//! Column references are positional; names are filled in from the input's row type.

use relx_core::catalog::InMemoryCatalog;
use relx_core::expr::*;
use relx_core::memo::{GroupId, Memo};
use relx_core::stats::Statistics;
use relx_exec::{InMemoryRowSource, Row};
use serde::Deserialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub plan: PlanSpec,
    /// Convention the root must be delivered in.
    #[serde(default = "default_convention")]
    pub convention: String,
    /// Stop searching once a plan at or below this cost exists.
    pub cost_ceiling: Option<f64>,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

fn default_convention() -> String {
    "ITERATOR".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    /// Estimated row count; defaults to the number of inline rows.
    pub row_count: Option<f64>,
    /// Owned by a federated source.
    #[serde(default)]
    pub federated: bool,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PlanSpec {
    Values {
        columns: Vec<ColumnSpec>,
        rows: Vec<Vec<Value>>,
    },
    Scan {
        schema: String,
        table: String,
    },
    Filter {
        predicate: ExprSpec,
        input: Box<PlanSpec>,
    },
    Project {
        exprs: Vec<NamedExpr>,
        input: Box<PlanSpec>,
    },
    #[serde(rename_all = "camelCase")]
    Join {
        #[serde(default = "default_join_type")]
        join_type: JoinType,
        condition: ExprSpec,
        left: Box<PlanSpec>,
        right: Box<PlanSpec>,
    },
    Sort {
        keys: Vec<SortSpec>,
        input: Box<PlanSpec>,
    },
    Limit {
        #[serde(default)]
        offset: u64,
        count: u64,
        input: Box<PlanSpec>,
    },
}

fn default_join_type() -> JoinType {
    JoinType::Inner
}

#[derive(Debug, Deserialize)]
pub struct NamedExpr {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub expr: ExprSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub expr: ExprSpec,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default)]
    pub nulls_first: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExprSpec {
    Column { index: u32 },
    Literal { value: Value },
    Binary { op: String, left: Box<ExprSpec>, right: Box<ExprSpec> },
    Unary { op: String, operand: Box<ExprSpec> },
    Call { name: String, args: Vec<ExprSpec> },
    And { args: Vec<ExprSpec> },
    Or { args: Vec<ExprSpec> },
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

pub fn row_type(columns: &[ColumnSpec]) -> RowType {
    RowType::new(
        columns
            .iter()
            .map(|c| Field {
                name: c.name.clone(),
                data_type: c.data_type,
                nullable: c.nullable,
            })
            .collect(),
    )
}

pub fn scalar(value: &Value) -> Result<ScalarValue, String> {
    match value {
        Value::Null => Ok(ScalarValue::Null),
        Value::Bool(b) => Ok(ScalarValue::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(ScalarValue::Int64(i)),
            None => n
                .as_f64()
                .map(ScalarValue::from)
                .ok_or_else(|| format!("unrepresentable number {n}")),
        },
        Value::String(s) => Ok(ScalarValue::Utf8(s.clone())),
        other => Err(format!("unsupported literal {other}")),
    }
}

pub fn json_value(value: &ScalarValue) -> Value {
    match value {
        ScalarValue::Null => Value::Null,
        ScalarValue::Bool(b) => Value::Bool(*b),
        ScalarValue::Int64(i) => Value::from(*i),
        ScalarValue::Float64(f) => Value::from(f.0),
        ScalarValue::Utf8(s) => Value::String(s.clone()),
        ScalarValue::Date(d) => Value::from(*d),
    }
}

fn rows(values: &[Vec<Value>]) -> Result<Vec<Row>, String> {
    values
        .iter()
        .map(|row| row.iter().map(scalar).collect())
        .collect()
}

fn binary_op(op: &str) -> Result<BinaryOp, String> {
    Ok(match op {
        "=" => BinaryOp::Eq,
        "<>" | "!=" => BinaryOp::NotEq,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::LtEq,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::GtEq,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        other => return Err(format!("unknown binary operator '{other}'")),
    })
}

fn unary_op(op: &str) -> Result<UnaryOp, String> {
    Ok(match op.to_ascii_lowercase().as_str() {
        "not" => UnaryOp::Not,
        "-" | "neg" => UnaryOp::Neg,
        "is_null" => UnaryOp::IsNull,
        "is_not_null" => UnaryOp::IsNotNull,
        other => return Err(format!("unknown unary operator '{other}'")),
    })
}

/// Resolve an expression against the row type it is evaluated on.
pub fn expr(spec: &ExprSpec, input: &RowType) -> Result<Expr, String> {
    let all = |args: &[ExprSpec]| args.iter().map(|a| expr(a, input)).collect::<Result<Vec<_>, _>>();
    Ok(match spec {
        ExprSpec::Column { index } => {
            let field = input
                .fields
                .get(*index as usize)
                .ok_or_else(|| format!("column ${index} out of range for {input}"))?;
            Expr::col(field.name.clone(), *index)
        }
        ExprSpec::Literal { value } => Expr::Literal(scalar(value)?),
        ExprSpec::Binary { op, left, right } => Expr::binary(binary_op(op)?, expr(left, input)?, expr(right, input)?),
        ExprSpec::Unary { op, operand } => Expr::UnaryOp {
            op: unary_op(op)?,
            operand: Box::new(expr(operand, input)?),
        },
        ExprSpec::Call { name, args } => Expr::Function {
            name: name.clone(),
            args: all(args)?,
        },
        ExprSpec::And { args } => Expr::And(all(args)?),
        ExprSpec::Or { args } => Expr::Or(all(args)?),
    })
}

/// Statistics and row types of the request's tables.
pub fn catalog(tables: &[TableSpec]) -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    for t in tables {
        let table = TableRef::new(t.schema.clone(), t.name.clone());
        let row_count = t.row_count.unwrap_or(t.rows.len() as f64);
        let stats = Statistics::new(row_count, row_count * 8.0 * t.columns.len() as f64);
        if t.federated {
            catalog.add_federated_table(&table, row_type(&t.columns), stats);
        } else {
            catalog.add_table(&table, row_type(&t.columns), stats);
        }
    }
    catalog
}

/// Inline rows of the request's tables.
pub fn row_source(tables: &[TableSpec]) -> Result<InMemoryRowSource, String> {
    let mut source = InMemoryRowSource::new();
    for t in tables {
        source.add_table(&TableRef::new(t.schema.clone(), t.name.clone()), rows(&t.rows)?);
    }
    Ok(source)
}

/// Insert the logical plan bottom-up and return its root group.
pub fn build_memo(spec: &PlanSpec, tables: &[TableSpec], memo: &mut Memo) -> Result<GroupId, String> {
    let (op, children) = match spec {
        PlanSpec::Values { columns, rows: values } => (
            Operator::Values {
                row_type: row_type(columns),
                rows: rows(values)?,
            },
            vec![],
        ),
        PlanSpec::Scan { schema, table } => {
            let t = tables
                .iter()
                .find(|t| t.schema == *schema && t.name == *table)
                .ok_or_else(|| format!("unknown table {schema}.{table}"))?;
            (
                Operator::Scan {
                    table: TableRef::new(schema.clone(), table.clone()),
                    row_type: row_type(&t.columns),
                },
                vec![],
            )
        }
        PlanSpec::Filter { predicate, input } => {
            let child = build_memo(input, tables, memo)?;
            let predicate = expr(predicate, &memo.group(child).row_type)?;
            (Operator::Filter { predicate }, vec![child])
        }
        PlanSpec::Project { exprs, input } => {
            let child = build_memo(input, tables, memo)?;
            let input_type = memo.group(child).row_type.clone();
            let resolved = exprs
                .iter()
                .map(|e| expr(&e.expr, &input_type))
                .collect::<Result<Vec<_>, _>>()?;
            let fields = exprs.iter().map(|e| Field::new(e.name.clone(), e.data_type)).collect();
            (
                Operator::Project {
                    exprs: resolved,
                    row_type: RowType::new(fields),
                },
                vec![child],
            )
        }
        PlanSpec::Join {
            join_type,
            condition,
            left,
            right,
        } => {
            let l = build_memo(left, tables, memo)?;
            let r = build_memo(right, tables, memo)?;
            let joined = memo.group(l).row_type.join(&memo.group(r).row_type, *join_type == JoinType::Left);
            (
                Operator::Join {
                    join_type: *join_type,
                    condition: expr(condition, &joined)?,
                },
                vec![l, r],
            )
        }
        PlanSpec::Sort { keys, input } => {
            let child = build_memo(input, tables, memo)?;
            let input_type = memo.group(child).row_type.clone();
            let order = keys
                .iter()
                .map(|k| {
                    Ok(SortKey {
                        expr: expr(&k.expr, &input_type)?,
                        ascending: k.ascending,
                        nulls_first: k.nulls_first,
                    })
                })
                .collect::<Result<Vec<_>, String>>()?;
            (Operator::Sort { order }, vec![child])
        }
        PlanSpec::Limit { offset, count, input } => {
            let child = build_memo(input, tables, memo)?;
            (
                Operator::Limit {
                    offset: *offset,
                    count: *count,
                },
                vec![child],
            )
        }
    };
    memo.add_logical(op, children).map_err(|e| e.to_string())
}
