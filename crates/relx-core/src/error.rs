//! # Error Taxonomy
//!
//! - [`ConfigurationError`]: bad registration, raised while building the planner
//!   registry at startup. Never produced at query time.
//! - [`NoConversionPath`]: no convertlet for a convention pair. Inside the search this
//!   only prunes a branch.
//! - [`OptimizationError`]: a single optimization could not produce a plan, or a
//!   registered rule / cost model broke an invariant.
//! - [`CodegenError`]: code generation failed for a selected plan.

use crate::convention::Convention;
use crate::expr::{OpKind, RowType};
use thiserror::Error;

/// Invalid registration discovered during the startup phase.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("convention {0} registered twice")]
    DuplicateConvention(String),
    #[error("convention {0} is referenced but was never registered")]
    UnknownConvention(String),
    #[error("a convertlet from {from} to {to} is already registered")]
    DuplicateConvertlet { from: Convention, to: Convention },
    #[error("a convertlet from {0} to itself converts nothing")]
    IdentityConvertlet(Convention),
    #[error("rule {0} registered twice")]
    DuplicateRule(String),
    #[error("an implementor for convention {0} is already registered")]
    DuplicateImplementor(Convention),
}

/// No convertlet bridges `from` to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no conversion path from {from} to {to}")]
pub struct NoConversionPath {
    pub from: Convention,
    pub to: Convention,
}

/// Failure of a single optimization.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizationError {
    /// No member of the root group can be produced in the required convention.
    #[error("cannot implement {operator} in convention {required}")]
    UnsatisfiableConvention {
        operator: String,
        required: Convention,
    },
    /// The search budget ran out before any candidate satisfied the goal.
    #[error("search budget exhausted after {iterations} iterations without a plan in {required}")]
    BudgetExceeded {
        iterations: usize,
        required: Convention,
    },
    /// A rule proposed an alternative whose row type disagrees with its group.
    #[error("rule {rule} produced row type {actual} for a group of row type {expected}")]
    RowTypeMismatch {
        rule: String,
        expected: RowType,
        actual: RowType,
    },
    /// A node came out cheaper than one of its inputs.
    #[error("cost of {node} ({cost}) is below its input cost ({input_cost})")]
    NonMonotonicCost {
        node: String,
        cost: f64,
        input_cost: f64,
    },
    /// An operator was given the wrong number of inputs.
    #[error("{kind:?} expects {expected} inputs, got {actual}")]
    InvalidExpression {
        kind: OpKind,
        expected: usize,
        actual: usize,
    },
    /// Plan extraction revisited a (group, convention) pair on the same path.
    #[error("cyclic plan through group {group} in {convention}")]
    CyclicPlan { group: u32, convention: Convention },
}

/// Failure while generating an executable fragment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    #[error("no implementor registered for convention {0}")]
    MissingImplementor(Convention),
    #[error(transparent)]
    NoConversionPath(#[from] NoConversionPath),
    /// An implementor received a child fragment of the wrong shape.
    #[error("{node} expected a {expected} input fragment")]
    FragmentMismatch {
        node: String,
        expected: &'static str,
    },
    /// An implementor does not support the operator in its convention.
    #[error("{kind:?} is not implementable in convention {convention}")]
    Unsupported { kind: OpKind, convention: Convention },
}
