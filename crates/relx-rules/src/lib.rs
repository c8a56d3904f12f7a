//! # Built-in Optimization Rules
//!
//! ## Transformation Rules (logical → logical)
//!
//! - **`JoinCommutativityRule`**: `A JOIN B` → `Project(B JOIN A)` for inner joins.
//! - **`FilterIntoJoinRule`**: merges a filter predicate into the inner join below it.
//! - **`MergeFilterRule`**: collapses two stacked filters into one.
//! - **`MergeProjectRule`**: collapses two stacked projections into one.
//! - **`RemoveTrivialProjectRule`**: drops a projection that returns its input unchanged.
//!
//! ## Implementation Rules (logical → physical)
//!
//! - **`ImplIteratorRule`**: every operator as a pull iterator (`ITERATOR`).
//! - **`FederatedScanRule`**: scans of federated tables in `FEDERATED`.
//! - **`ImplCompiledRule`**: filter, project and inner join in generated code
//!   (`COMPILED`), filter and project over records (`COMPILED_RECORD`).

pub mod filter_into_join;
pub mod impl_compiled;
pub mod impl_federated;
pub mod impl_iterator;
pub mod join_commutativity;
pub mod merge_filter;
pub mod merge_project;
pub mod remove_trivial_project;

use relx_core::error::ConfigurationError;
use relx_core::registry::RegistryBuilder;
use relx_core::rule::Rule;
use std::sync::Arc;

/// All built-in rules in registration order: transformations first.
pub fn default_rules() -> Vec<Arc<dyn Rule>> {
    let mut rules: Vec<Arc<dyn Rule>> = vec![
        Arc::new(join_commutativity::JoinCommutativityRule),
        Arc::new(filter_into_join::FilterIntoJoinRule),
        Arc::new(merge_filter::MergeFilterRule),
        Arc::new(merge_project::MergeProjectRule),
        Arc::new(remove_trivial_project::RemoveTrivialProjectRule),
    ];
    rules.extend(
        impl_iterator::ImplIteratorRule::all()
            .into_iter()
            .map(|r| Arc::new(r) as Arc<dyn Rule>),
    );
    rules.push(Arc::new(impl_federated::FederatedScanRule));
    rules.extend(
        impl_compiled::ImplCompiledRule::all()
            .into_iter()
            .map(|r| Arc::new(r) as Arc<dyn Rule>),
    );
    rules
}

/// Register every built-in rule.
pub fn register_default_rules(builder: &mut RegistryBuilder) -> Result<(), ConfigurationError> {
    for rule in default_rules() {
        builder.register_rule(rule)?;
    }
    Ok(())
}
