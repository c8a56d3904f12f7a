//! # Executable Fragments
//!
//! The code generator turns each plan node into a [`Fragment`], the executable form of
//! a subtree in the node's calling convention:
//!
//! - [`Fragment::Iterator`]: a pull pipeline ([`IterPlan`]). Parents wrap it.
//! - [`Fragment::Code`]: generated statements over rows bound to variables
//!   ([`CodeBlock`]). The block has exactly one hole ([`Stmt::Splice`]) where the
//!   consumer's per-row body goes, and a row expression naming the current row at
//!   that hole. A consumer never rewrites the block; it fills the hole.
//! - [`Fragment::Remote`]: rows still owned by a federated source.
//!
//! For example a compiled projection over a loop bridged from an iterator:
//!
//! ```text
//! open v0 = Values[3 rows]
//! while has_next(v0) {
//!   let v1 = next(v0)
//!   let v2 = v1
//!   <hole>                      row: [(v2[0] * 2)]
//! }
//! ```
//!
//! The root of a plan is finalized into an [`ExecutableFragment`].

use crate::expr::{BinaryOp, ColumnRef, Expr, JoinType, RowType, ScalarValue, SortKey, TableRef, UnaryOp};
use serde::Serialize;
use std::fmt;

/// A variable of generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Var(pub u32);

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Expressions of generated code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CodeExpr {
    Var(Var),
    /// Positional access into a row.
    Field { row: Box<CodeExpr>, index: u32 },
    /// Named access into a record.
    /// Field `index` of a record; `name` is what the record calls it there.
    RecordField {
        record: Box<CodeExpr>,
        index: u32,
        name: String,
    },
    Literal(ScalarValue),
    Binary {
        op: BinaryOp,
        left: Box<CodeExpr>,
        right: Box<CodeExpr>,
    },
    Unary { op: UnaryOp, operand: Box<CodeExpr> },
    And(Vec<CodeExpr>),
    Or(Vec<CodeExpr>),
    Call { name: String, args: Vec<CodeExpr> },
    /// Build a positional row.
    MakeRow(Vec<CodeExpr>),
    /// View a positional row as a record with the given field names.
    ToRecord { row: Box<CodeExpr>, names: Vec<String> },
    /// Flatten a record into a positional row. Fields are taken by position; `names`
    /// is the record's expected layout.
    ToRow { record: Box<CodeExpr>, names: Vec<String> },
    /// Concatenate two positional rows.
    Concat(Box<CodeExpr>, Box<CodeExpr>),
    HasNext(Var),
    Next(Var),
}

impl CodeExpr {
    /// Lower a planner expression, resolving column references through `column`.
    pub fn lower(expr: &Expr, column: &impl Fn(&ColumnRef) -> CodeExpr) -> CodeExpr {
        match expr {
            Expr::Column(c) => column(c),
            Expr::Literal(v) => CodeExpr::Literal(v.clone()),
            Expr::BinaryOp { op, left, right } => CodeExpr::Binary {
                op: *op,
                left: Box::new(Self::lower(left, column)),
                right: Box::new(Self::lower(right, column)),
            },
            Expr::UnaryOp { op, operand } => CodeExpr::Unary {
                op: *op,
                operand: Box::new(Self::lower(operand, column)),
            },
            Expr::Function { name, args } => CodeExpr::Call {
                name: name.clone(),
                args: args.iter().map(|a| Self::lower(a, column)).collect(),
            },
            Expr::And(exprs) => CodeExpr::And(exprs.iter().map(|e| Self::lower(e, column)).collect()),
            Expr::Or(exprs) => CodeExpr::Or(exprs.iter().map(|e| Self::lower(e, column)).collect()),
        }
    }

    /// Lower against a positional row held in `row`.
    pub fn lower_positional(expr: &Expr, row: Var) -> CodeExpr {
        Self::lower(expr, &|c| CodeExpr::Field {
            row: Box::new(CodeExpr::Var(row)),
            index: c.index,
        })
    }

    /// Lower against a record held in `record` whose fields are named by `row_type`.
    /// Fields are addressed by ordinal, so duplicate names (self-joins) stay distinct.
    pub fn lower_named(expr: &Expr, record: Var, row_type: &RowType) -> CodeExpr {
        Self::lower(expr, &|c| CodeExpr::RecordField {
            record: Box::new(CodeExpr::Var(record)),
            index: c.index,
            name: row_type
                .fields
                .get(c.index as usize)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| c.name.clone()),
        })
    }
}

/// Statements of generated code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    Let { var: Var, value: CodeExpr },
    /// Open a cursor over an iterator pipeline.
    Open { cursor: Var, source: IterPlan },
    While { cond: CodeExpr, body: Vec<Stmt> },
    If { cond: CodeExpr, then: Vec<Stmt> },
    /// The hole where the consumer's per-row body is spliced.
    Splice,
    /// Hand a row to the caller of the program.
    Emit(CodeExpr),
}

/// Generated statements with one hole and the row expression valid at the hole.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlock {
    pub stmts: Vec<Stmt>,
    pub row: CodeExpr,
}

impl CodeBlock {
    pub fn new(stmts: Vec<Stmt>, row: CodeExpr) -> Self {
        Self { stmts, row }
    }

    /// Fill the hole with `body`.
    pub fn splice(self, body: Vec<Stmt>) -> Vec<Stmt> {
        let mut body = Some(body);
        splice_into(self.stmts, &mut body)
    }

    /// Fill the hole with `body`, which carries the next hole, and expose `row` there.
    pub fn extend(self, body: Vec<Stmt>, row: CodeExpr) -> CodeBlock {
        CodeBlock {
            stmts: self.splice(body),
            row,
        }
    }

    /// Same statements, different row expression.
    pub fn with_row(self, row: CodeExpr) -> CodeBlock {
        CodeBlock { row, ..self }
    }

    pub fn holes(&self) -> usize {
        count_holes(&self.stmts)
    }
}

fn splice_into(stmts: Vec<Stmt>, body: &mut Option<Vec<Stmt>>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        match stmt {
            Stmt::Splice => match body.take() {
                Some(b) => out.extend(b),
                None => out.push(Stmt::Splice),
            },
            Stmt::While { cond, body: inner } => out.push(Stmt::While {
                cond,
                body: splice_into(inner, body),
            }),
            Stmt::If { cond, then } => out.push(Stmt::If {
                cond,
                then: splice_into(then, body),
            }),
            other => out.push(other),
        }
    }
    out
}

fn count_holes(stmts: &[Stmt]) -> usize {
    stmts
        .iter()
        .map(|s| match s {
            Stmt::Splice => 1,
            Stmt::While { body, .. } => count_holes(body),
            Stmt::If { then, .. } => count_holes(then),
            _ => 0,
        })
        .sum()
}

/// Pull-based pipelines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IterPlan {
    Values { rows: Vec<Vec<ScalarValue>> },
    Scan { table: TableRef },
    /// Rows pulled out of a federated source.
    Fetch { table: TableRef },
    Filter { input: Box<IterPlan>, predicate: Expr },
    Project { input: Box<IterPlan>, exprs: Vec<Expr> },
    NestedLoopJoin {
        left: Box<IterPlan>,
        right: Box<IterPlan>,
        join_type: JoinType,
        condition: Expr,
        /// Column count of the right input, for NULL padding.
        right_width: usize,
    },
    Sort { input: Box<IterPlan>, order: Vec<SortKey> },
    Limit { input: Box<IterPlan>, offset: u64, count: u64 },
    /// Run a generated program and buffer what it emits.
    Materialize { program: Vec<Stmt> },
}

/// A table whose rows are still owned by a federated source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteAccess {
    pub table: TableRef,
    pub row_type: RowType,
}

/// The executable form of a plan subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Fragment {
    Iterator(IterPlan),
    Code(CodeBlock),
    Remote(RemoteAccess),
}

impl Fragment {
    pub fn kind(&self) -> &'static str {
        match self {
            Fragment::Iterator(_) => "iterator",
            Fragment::Code(_) => "code",
            Fragment::Remote(_) => "remote",
        }
    }
}

/// The finalized output of code generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExecutableFragment {
    Pipeline(IterPlan),
    /// A program whose hole was replaced by `Emit`.
    Program(Vec<Stmt>),
}

impl fmt::Display for CodeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeExpr::Var(v) => write!(f, "{v}"),
            CodeExpr::Field { row, index } => write!(f, "{row}[{index}]"),
            CodeExpr::RecordField { record, name, .. } => write!(f, "{record}.{name}"),
            CodeExpr::Literal(v) => write!(f, "{v}"),
            CodeExpr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            CodeExpr::Unary { op, operand } => write!(f, "{op:?}({operand})"),
            CodeExpr::And(es) => write_list(f, "and(", es, ")"),
            CodeExpr::Or(es) => write_list(f, "or(", es, ")"),
            CodeExpr::Call { name, args } => {
                write!(f, "{name}")?;
                write_list(f, "(", args, ")")
            }
            CodeExpr::MakeRow(es) => write_list(f, "[", es, "]"),
            CodeExpr::ToRecord { row, names } => write!(f, "record({row}, {})", names.join(", ")),
            CodeExpr::ToRow { record, names } => write!(f, "row({record}, {})", names.join(", ")),
            CodeExpr::Concat(l, r) => write!(f, "concat({l}, {r})"),
            CodeExpr::HasNext(v) => write!(f, "has_next({v})"),
            CodeExpr::Next(v) => write!(f, "next({v})"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, open: &str, items: &[CodeExpr], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, e) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{e}")?;
    }
    f.write_str(close)
}

impl fmt::Display for IterPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterPlan::Values { rows } => write!(f, "Values[{} rows]", rows.len()),
            IterPlan::Scan { table } => write!(f, "Scan[{table}]"),
            IterPlan::Fetch { table } => write!(f, "Fetch[{table}]"),
            IterPlan::Filter { input, predicate } => write!(f, "Filter[{predicate}]({input})"),
            IterPlan::Project { input, exprs } => {
                let exprs: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
                write!(f, "Project[{}]({input})", exprs.join(", "))
            }
            IterPlan::NestedLoopJoin {
                left,
                right,
                join_type,
                condition,
                ..
            } => write!(f, "NestedLoopJoin[{join_type:?}, {condition}]({left}, {right})"),
            IterPlan::Sort { input, order } => write!(f, "Sort[{} keys]({input})", order.len()),
            IterPlan::Limit { input, offset, count } => write!(f, "Limit[{offset}, {count}]({input})"),
            IterPlan::Materialize { program } => write!(f, "Materialize[{} stmts]", program.len()),
        }
    }
}

fn write_stmts(f: &mut fmt::Formatter<'_>, stmts: &[Stmt], depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for stmt in stmts {
        match stmt {
            Stmt::Let { var, value } => writeln!(f, "{pad}let {var} = {value}")?,
            Stmt::Open { cursor, source } => writeln!(f, "{pad}open {cursor} = {source}")?,
            Stmt::While { cond, body } => {
                writeln!(f, "{pad}while {cond} {{")?;
                write_stmts(f, body, depth + 1)?;
                writeln!(f, "{pad}}}")?;
            }
            Stmt::If { cond, then } => {
                writeln!(f, "{pad}if {cond} {{")?;
                write_stmts(f, then, depth + 1)?;
                writeln!(f, "{pad}}}")?;
            }
            Stmt::Splice => writeln!(f, "{pad}<hole>")?,
            Stmt::Emit(e) => writeln!(f, "{pad}emit {e}")?,
        }
    }
    Ok(())
}

impl fmt::Display for ExecutableFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutableFragment::Pipeline(plan) => writeln!(f, "{plan}"),
            ExecutableFragment::Program(stmts) => write_stmts(f, stmts, 0),
        }
    }
}
