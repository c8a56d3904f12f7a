//! # Code-Generation Driver
//!
//! Walks a selected [`PhysicalPlan`] bottom-up and asks, for every node, the component
//! responsible for its convention to produce a [`Fragment`]:
//!
//! - ordinary operators go to the [`RelImplementor`] registered for the node's
//!   convention;
//! - converter nodes go to the convertlet registered for (child convention, node
//!   convention).
//!
//! Children are realized before their parent and cached by node identity, so a node
//! shared by several parents is generated once. Fresh variables come from a
//! [`CodegenContext`] that lives for a single `generate` call.
//!
//! At the root a code block is closed by filling its hole with `emit <row>`; an
//! iterator pipeline is returned as is.

use crate::convention::Convention;
use crate::error::CodegenError;
use crate::expr::Operator;
use crate::fragment::{ExecutableFragment, Fragment, Stmt, Var};
use crate::memo::{ExprId, PhysicalPlan, PlanNode};
use crate::registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-run code generation state.
#[derive(Debug, Default)]
pub struct CodegenContext {
    next_var: u32,
}

impl CodegenContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A variable not used anywhere else in this run.
    pub fn fresh(&mut self) -> Var {
        let var = Var(self.next_var);
        self.next_var += 1;
        var
    }
}

/// Realizes ordinary operators of one calling convention.
pub trait RelImplementor: Send + Sync {
    fn convention(&self) -> Convention;

    /// Produce the fragment for `node` given its children's fragments, in child order.
    fn implement(
        &self,
        node: &PlanNode,
        inputs: Vec<Fragment>,
        cx: &mut CodegenContext,
    ) -> Result<Fragment, CodegenError>;
}

pub struct CodeGenerator {
    registry: Arc<Registry>,
}

impl CodeGenerator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn generate(&self, plan: &PhysicalPlan) -> Result<ExecutableFragment, CodegenError> {
        let mut cx = CodegenContext::new();
        let mut cache = HashMap::new();
        let root = self.realize(plan.root(), &mut cx, &mut cache)?;
        debug!(
            "Generated {} fragment for plan of cost {:.2}",
            root.kind(),
            plan.cost().total
        );
        match root {
            Fragment::Iterator(pipeline) => Ok(ExecutableFragment::Pipeline(pipeline)),
            Fragment::Code(block) => {
                let row = block.row.clone();
                Ok(ExecutableFragment::Program(block.splice(vec![Stmt::Emit(row)])))
            }
            Fragment::Remote(_) => Err(CodegenError::FragmentMismatch {
                node: plan.root().op.to_string(),
                expected: "iterator or code",
            }),
        }
    }

    fn realize(
        &self,
        node: &PlanNode,
        cx: &mut CodegenContext,
        cache: &mut HashMap<ExprId, Fragment>,
    ) -> Result<Fragment, CodegenError> {
        if let Some(done) = cache.get(&node.id) {
            return Ok(done.clone());
        }

        let mut inputs = Vec::with_capacity(node.children.len());
        for child in &node.children {
            inputs.push(self.realize(child, cx, cache)?);
        }

        let fragment = match &node.op {
            Operator::Converter { from } => {
                let convertlet = self.registry.convertlets().lookup(*from, node.convention)?;
                let child = inputs.pop().ok_or_else(|| CodegenError::FragmentMismatch {
                    node: node.op.to_string(),
                    expected: "single input",
                })?;
                trace!("Converting {} -> {} for node {}", from, node.convention, node.id);
                convertlet.realize(child, &node.row_type, cx)?
            }
            _ => {
                let implementor = self
                    .registry
                    .implementor(node.convention)
                    .ok_or(CodegenError::MissingImplementor(node.convention))?;
                trace!("Implementing {} in {}", node.op, node.convention);
                implementor.implement(node, inputs, cx)?
            }
        };

        cache.insert(node.id, fragment.clone());
        Ok(fragment)
    }
}
