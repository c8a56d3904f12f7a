//! # Operator Implementors
//!
//! One [`RelImplementor`] per native convention. Each receives its children's
//! fragments already in the convention the node required of them, so a compiled
//! filter always sees a code block and the right side of a compiled join always sees
//! an iterator pipeline.

use relx_core::codegen::{CodegenContext, RelImplementor};
use relx_core::convention::Convention;
use relx_core::error::CodegenError;
use relx_core::expr::{Expr, JoinType, Operator, RowType};
use relx_core::fragment::{CodeBlock, CodeExpr, Fragment, IterPlan, RemoteAccess, Stmt, Var};
use relx_core::memo::PlanNode;
use std::sync::Arc;

fn unsupported(node: &PlanNode) -> CodegenError {
    CodegenError::Unsupported {
        kind: node.op.kind(),
        convention: node.convention,
    }
}

fn take_single(node: &PlanNode, inputs: Vec<Fragment>) -> Result<Fragment, CodegenError> {
    let mut inputs = inputs.into_iter();
    match (inputs.next(), inputs.next()) {
        (Some(input), None) => Ok(input),
        _ => Err(CodegenError::FragmentMismatch {
            node: node.op.to_string(),
            expected: "single input",
        }),
    }
}

fn take_pair(node: &PlanNode, inputs: Vec<Fragment>) -> Result<(Fragment, Fragment), CodegenError> {
    let mut inputs = inputs.into_iter();
    match (inputs.next(), inputs.next(), inputs.next()) {
        (Some(left), Some(right), None) => Ok((left, right)),
        _ => Err(CodegenError::FragmentMismatch {
            node: node.op.to_string(),
            expected: "two inputs",
        }),
    }
}

fn iterator(node: &PlanNode, fragment: Fragment) -> Result<IterPlan, CodegenError> {
    match fragment {
        Fragment::Iterator(plan) => Ok(plan),
        _ => Err(CodegenError::FragmentMismatch {
            node: node.op.to_string(),
            expected: "iterator",
        }),
    }
}

fn code(node: &PlanNode, fragment: Fragment) -> Result<CodeBlock, CodegenError> {
    match fragment {
        Fragment::Code(block) => Ok(block),
        _ => Err(CodegenError::FragmentMismatch {
            node: node.op.to_string(),
            expected: "code",
        }),
    }
}

/// Pull pipelines.
pub struct IteratorImplementor;

impl RelImplementor for IteratorImplementor {
    fn convention(&self) -> Convention {
        Convention::ITERATOR
    }

    fn implement(&self, node: &PlanNode, inputs: Vec<Fragment>, _cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        let plan = match &node.op {
            Operator::Values { rows, .. } => IterPlan::Values { rows: rows.clone() },
            Operator::Scan { table, .. } => IterPlan::Scan { table: table.clone() },
            Operator::Filter { predicate } => IterPlan::Filter {
                input: Box::new(iterator(node, take_single(node, inputs)?)?),
                predicate: predicate.clone(),
            },
            Operator::Project { exprs, .. } => IterPlan::Project {
                input: Box::new(iterator(node, take_single(node, inputs)?)?),
                exprs: exprs.clone(),
            },
            Operator::Join { join_type, condition } => {
                let right_width = node.children.get(1).map_or(0, |c| c.row_type.len());
                let (left, right) = take_pair(node, inputs)?;
                IterPlan::NestedLoopJoin {
                    left: Box::new(iterator(node, left)?),
                    right: Box::new(iterator(node, right)?),
                    join_type: *join_type,
                    condition: condition.clone(),
                    right_width,
                }
            }
            Operator::Sort { order } => IterPlan::Sort {
                input: Box::new(iterator(node, take_single(node, inputs)?)?),
                order: order.clone(),
            },
            Operator::Limit { offset, count } => IterPlan::Limit {
                input: Box::new(iterator(node, take_single(node, inputs)?)?),
                offset: *offset,
                count: *count,
            },
            Operator::Converter { .. } => return Err(unsupported(node)),
        };
        Ok(Fragment::Iterator(plan))
    }
}

/// Generated row-at-a-time code, over positional rows or named records.
pub struct CompiledImplementor {
    convention: Convention,
}

impl CompiledImplementor {
    pub fn positional() -> Self {
        Self {
            convention: Convention::COMPILED,
        }
    }

    pub fn record() -> Self {
        Self {
            convention: Convention::COMPILED_RECORD,
        }
    }

    fn is_record(&self) -> bool {
        self.convention == Convention::COMPILED_RECORD
    }

    fn lower(&self, expr: &Expr, var: Var, input: &RowType) -> CodeExpr {
        if self.is_record() {
            CodeExpr::lower_named(expr, var, input)
        } else {
            CodeExpr::lower_positional(expr, var)
        }
    }

    fn input_row_type<'a>(node: &'a PlanNode) -> &'a RowType {
        node.children.first().map_or(&node.row_type, |c| &c.row_type)
    }
}

impl RelImplementor for CompiledImplementor {
    fn convention(&self) -> Convention {
        self.convention
    }

    fn implement(&self, node: &PlanNode, inputs: Vec<Fragment>, cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        match &node.op {
            Operator::Filter { predicate } => {
                let block = code(node, take_single(node, inputs)?)?;
                let current = cx.fresh();
                let cond = self.lower(predicate, current, Self::input_row_type(node));
                let bind = Stmt::Let {
                    var: current,
                    value: block.row.clone(),
                };
                Ok(Fragment::Code(block.extend(
                    vec![
                        bind,
                        Stmt::If {
                            cond,
                            then: vec![Stmt::Splice],
                        },
                    ],
                    CodeExpr::Var(current),
                )))
            }
            Operator::Project { exprs, row_type } => {
                let block = code(node, take_single(node, inputs)?)?;
                let current = cx.fresh();
                let input = Self::input_row_type(node);
                let values = CodeExpr::MakeRow(exprs.iter().map(|e| self.lower(e, current, input)).collect());
                let row = if self.is_record() {
                    CodeExpr::ToRecord {
                        row: Box::new(values),
                        names: row_type.names(),
                    }
                } else {
                    values
                };
                let bind = Stmt::Let {
                    var: current,
                    value: block.row.clone(),
                };
                Ok(Fragment::Code(block.extend(vec![bind, Stmt::Splice], row)))
            }
            Operator::Join {
                join_type: JoinType::Inner,
                condition,
            } if !self.is_record() => {
                let (left, right) = take_pair(node, inputs)?;
                let left = code(node, left)?;
                let right = iterator(node, right)?;
                let outer = cx.fresh();
                let cursor = cx.fresh();
                let inner = cx.fresh();
                let joined = cx.fresh();
                let body = vec![
                    Stmt::Let {
                        var: outer,
                        value: left.row.clone(),
                    },
                    Stmt::Open { cursor, source: right },
                    Stmt::While {
                        cond: CodeExpr::HasNext(cursor),
                        body: vec![
                            Stmt::Let {
                                var: inner,
                                value: CodeExpr::Next(cursor),
                            },
                            Stmt::Let {
                                var: joined,
                                value: CodeExpr::Concat(
                                    Box::new(CodeExpr::Var(outer)),
                                    Box::new(CodeExpr::Var(inner)),
                                ),
                            },
                            Stmt::If {
                                cond: CodeExpr::lower_positional(condition, joined),
                                then: vec![Stmt::Splice],
                            },
                        ],
                    },
                ];
                Ok(Fragment::Code(left.extend(body, CodeExpr::Var(joined))))
            }
            _ => Err(unsupported(node)),
        }
    }
}

/// Leaves owned by a federated source.
pub struct FederatedImplementor;

impl RelImplementor for FederatedImplementor {
    fn convention(&self) -> Convention {
        Convention::FEDERATED
    }

    fn implement(&self, node: &PlanNode, _inputs: Vec<Fragment>, _cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        match &node.op {
            Operator::Scan { table, row_type } => Ok(Fragment::Remote(RemoteAccess {
                table: table.clone(),
                row_type: row_type.clone(),
            })),
            _ => Err(unsupported(node)),
        }
    }
}

pub fn builtin_implementors() -> Vec<Arc<dyn RelImplementor>> {
    vec![
        Arc::new(IteratorImplementor),
        Arc::new(CompiledImplementor::positional()),
        Arc::new(CompiledImplementor::record()),
        Arc::new(FederatedImplementor),
    ]
}
