//! # relx-core: Convention-Aware Volcano Planner
//!
//! This crate implements the physical-plan optimization core of a relational query
//! engine. A logical plan enters the memo; rules propose physical implementations in
//! different calling conventions; converter nodes bridge conventions wherever a parent
//! and child disagree; the cheapest plan in the required convention is extracted and
//! handed to the code generator.
//!
//! ## Module Overview
//!
//! - **`convention`**: calling conventions and the conversion graph.
//! - **`convertlet`**: per-convention-pair converters and their registry.
//! - **`registry`**: the build-once planner registry shared by all optimizations.
//! - **`expr`**: operators, scalar expressions and row types.
//! - **`memo`**: groups, expressions, winners and plan extraction.
//! - **`search`**: the fixpoint search with converter insertion.
//! - **`rule`** / **`pattern`**: the rule trait and declarative matching.
//! - **`cost`** / **`stats`** / **`catalog`**: costing inputs.
//! - **`fragment`** / **`codegen`**: executable fragments and the code-generation driver.
//! - **`error`**: error types.

pub mod catalog;
pub mod codegen;
pub mod convention;
pub mod convertlet;
pub mod cost;
pub mod error;
pub mod expr;
pub mod fragment;
pub mod memo;
pub mod pattern;
pub mod registry;
pub mod rule;
pub mod search;
pub mod stats;

use crate::catalog::Catalog;
use crate::cost::DefaultCostModel;
use crate::error::OptimizationError;
use crate::memo::{GroupId, Memo, PhysicalPlan};
use crate::registry::Registry;
use crate::search::{Goal, SearchConfig, VolcanoSearch};
use std::sync::Arc;

/// Optimize a logical plan with the default cost model and search budgets.
pub fn optimize(
    memo: Memo,
    root: GroupId,
    goal: &Goal,
    registry: Arc<Registry>,
    catalog: Arc<dyn Catalog>,
) -> Result<PhysicalPlan, OptimizationError> {
    let mut search = VolcanoSearch::new(
        memo,
        registry,
        Arc::new(DefaultCostModel::default()),
        catalog,
        SearchConfig::default(),
    );
    search.optimize(root, goal)
}
