//! # Built-in Convertlets
//!
//! | from | to | bridge |
//! |------|----|--------|
//! | `FEDERATED` | `ITERATOR` | fetch the remote rows as a pipeline |
//! | `ITERATOR` | `COMPILED` | open a cursor and loop over it in generated code |
//! | `COMPILED` | `ITERATOR` | run the generated loop and buffer what it emits |
//! | `COMPILED` | `COMPILED_RECORD` | view the current row as a record |
//! | `COMPILED_RECORD` | `COMPILED` | flatten the current record into a row |
//!
//! The first three change control flow: the consumer gets a different kind of
//! fragment. The record bridges only rewrite the row expression at the hole and leave
//! the statements untouched.
//!
//! Per-row prices are relative to one iterator row handoff.

use relx_core::codegen::CodegenContext;
use relx_core::convention::Convention;
use relx_core::convertlet::Convertlet;
use relx_core::cost::Cost;
use relx_core::error::CodegenError;
use relx_core::expr::RowType;
use relx_core::fragment::{CodeBlock, CodeExpr, Fragment, IterPlan, Stmt};
use std::sync::Arc;

fn mismatch(pair: (Convention, Convention), expected: &'static str) -> CodegenError {
    CodegenError::FragmentMismatch {
        node: format!("Converter[{} -> {}]", pair.0, pair.1),
        expected,
    }
}

pub struct FederatedToIterator;

impl Convertlet for FederatedToIterator {
    fn from(&self) -> Convention {
        Convention::FEDERATED
    }

    fn to(&self) -> Convention {
        Convention::ITERATOR
    }

    /// Rows cross the wire, wider rows cost more.
    fn estimated_cost(&self, row_type: &RowType, rows: f64) -> Cost {
        Cost::new(rows * (2.0 + 0.1 * row_type.len() as f64))
    }

    fn realize(&self, child: Fragment, _row_type: &RowType, _cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        match child {
            Fragment::Remote(access) => Ok(Fragment::Iterator(IterPlan::Fetch { table: access.table })),
            _ => Err(mismatch((self.from(), self.to()), "remote")),
        }
    }
}

pub struct IteratorToCompiled;

impl Convertlet for IteratorToCompiled {
    fn from(&self) -> Convention {
        Convention::ITERATOR
    }

    fn to(&self) -> Convention {
        Convention::COMPILED
    }

    fn estimated_cost(&self, _row_type: &RowType, rows: f64) -> Cost {
        Cost::new(rows * 0.1)
    }

    fn realize(&self, child: Fragment, _row_type: &RowType, cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        let Fragment::Iterator(source) = child else {
            return Err(mismatch((self.from(), self.to()), "iterator"));
        };
        let cursor = cx.fresh();
        let row = cx.fresh();
        Ok(Fragment::Code(CodeBlock::new(
            vec![
                Stmt::Open { cursor, source },
                Stmt::While {
                    cond: CodeExpr::HasNext(cursor),
                    body: vec![
                        Stmt::Let {
                            var: row,
                            value: CodeExpr::Next(cursor),
                        },
                        Stmt::Splice,
                    ],
                },
            ],
            CodeExpr::Var(row),
        )))
    }
}

pub struct CompiledToIterator;

impl Convertlet for CompiledToIterator {
    fn from(&self) -> Convention {
        Convention::COMPILED
    }

    fn to(&self) -> Convention {
        Convention::ITERATOR
    }

    fn estimated_cost(&self, row_type: &RowType, rows: f64) -> Cost {
        Cost::new(rows * (1.0 + 0.01 * row_type.len() as f64))
    }

    fn realize(&self, child: Fragment, _row_type: &RowType, _cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        let Fragment::Code(block) = child else {
            return Err(mismatch((self.from(), self.to()), "code"));
        };
        let row = block.row.clone();
        Ok(Fragment::Iterator(IterPlan::Materialize {
            program: block.splice(vec![Stmt::Emit(row)]),
        }))
    }
}

pub struct CompiledToRecord;

impl Convertlet for CompiledToRecord {
    fn from(&self) -> Convention {
        Convention::COMPILED
    }

    fn to(&self) -> Convention {
        Convention::COMPILED_RECORD
    }

    fn estimated_cost(&self, _row_type: &RowType, rows: f64) -> Cost {
        Cost::new(rows * 0.05)
    }

    fn realize(&self, child: Fragment, row_type: &RowType, _cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        let Fragment::Code(block) = child else {
            return Err(mismatch((self.from(), self.to()), "code"));
        };
        let row = CodeExpr::ToRecord {
            row: Box::new(block.row.clone()),
            names: row_type.names(),
        };
        Ok(Fragment::Code(block.with_row(row)))
    }
}

pub struct RecordToCompiled;

impl Convertlet for RecordToCompiled {
    fn from(&self) -> Convention {
        Convention::COMPILED_RECORD
    }

    fn to(&self) -> Convention {
        Convention::COMPILED
    }

    fn estimated_cost(&self, _row_type: &RowType, rows: f64) -> Cost {
        Cost::new(rows * 0.05)
    }

    fn realize(&self, child: Fragment, row_type: &RowType, _cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        let Fragment::Code(block) = child else {
            return Err(mismatch((self.from(), self.to()), "code"));
        };
        let row = CodeExpr::ToRow {
            record: Box::new(block.row.clone()),
            names: row_type.names(),
        };
        Ok(Fragment::Code(block.with_row(row)))
    }
}

/// Built-in convertlets in registration order.
pub fn builtin_convertlets() -> Vec<Arc<dyn Convertlet>> {
    vec![
        Arc::new(FederatedToIterator),
        Arc::new(IteratorToCompiled),
        Arc::new(CompiledToIterator),
        Arc::new(CompiledToRecord),
        Arc::new(RecordToCompiled),
    ]
}
