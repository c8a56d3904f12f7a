//! # Calling Conventions and the Trait Registry
//!
//! A calling convention names the execution strategy a physical operator uses to hand
//! rows to its parent. Two adjacent operators that disagree on convention cannot be
//! wired together directly; the planner bridges them with a converter node whose
//! behavior is supplied by a convertlet (see [`crate::convertlet`]).
//!
//! ## Built-in Conventions
//!
//! - **`NONE`**: logical operators. Nodes in this convention cannot be executed and
//!   carry infinite cost, so they are never selected.
//! - **`ITERATOR`**: pull-style iteration. Each operator exposes a cursor that the
//!   parent advances one row at a time.
//! - **`COMPILED`**: generated imperative code. Rows are pushed through nested loops
//!   as positional value arrays bound to variables.
//! - **`COMPILED_RECORD`**: generated code over named records instead of positional
//!   arrays. Bridging to and from `COMPILED` needs no new control flow.
//! - **`FEDERATED`**: rows still owned by a foreign data source and not yet pulled
//!   into the native engine.
//!
//! Conventions carry no behavior of their own; they are comparison keys.
//!
//! ## Trait Registry
//!
//! [`TraitRegistry`] is the read-only view of the convention set and the static
//! conversion graph. It is derived from the convertlet registry when the planner
//! registry is built and never changes afterwards.

use crate::error::ConfigurationError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

/// Tag identifying a physical execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Convention(&'static str);

impl Convention {
    /// Logical operators; never executable.
    pub const NONE: Convention = Convention("NONE");
    /// Pull-style iteration.
    pub const ITERATOR: Convention = Convention("ITERATOR");
    /// Generated code over positional rows.
    pub const COMPILED: Convention = Convention("COMPILED");
    /// Generated code over named records.
    pub const COMPILED_RECORD: Convention = Convention("COMPILED_RECORD");
    /// Rows held by a federated (foreign) source.
    pub const FEDERATED: Convention = Convention("FEDERATED");

    /// Declare a convention. Embedders use this for conventions beyond the built-ins.
    pub const fn new(name: &'static str) -> Self {
        Convention(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Convention::NONE
    }

    /// All built-in conventions in declaration order.
    pub fn builtins() -> [Convention; 5] {
        [
            Convention::NONE,
            Convention::ITERATOR,
            Convention::COMPILED,
            Convention::COMPILED_RECORD,
            Convention::FEDERATED,
        ]
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Read-only view of the registered conventions and the conversion graph.
#[derive(Debug, Clone, Default)]
pub struct TraitRegistry {
    conventions: Vec<Convention>,
    by_name: HashMap<&'static str, Convention>,
    /// Outgoing edges in convertlet registration order.
    edges: BTreeMap<Convention, Vec<Convention>>,
}

impl TraitRegistry {
    /// Build the view. Every edge endpoint must be a registered convention.
    pub(crate) fn new(
        conventions: Vec<Convention>,
        pairs: impl IntoIterator<Item = (Convention, Convention)>,
    ) -> Result<Self, ConfigurationError> {
        let by_name: HashMap<_, _> = conventions.iter().map(|c| (c.name(), *c)).collect();
        let known: HashSet<Convention> = conventions.iter().copied().collect();
        let mut edges: BTreeMap<Convention, Vec<Convention>> = BTreeMap::new();
        for (from, to) in pairs {
            for c in [from, to] {
                if !known.contains(&c) {
                    return Err(ConfigurationError::UnknownConvention(c.name().to_string()));
                }
            }
            edges.entry(from).or_default().push(to);
        }
        Ok(Self {
            conventions,
            by_name,
            edges,
        })
    }

    pub fn conventions(&self) -> &[Convention] {
        &self.conventions
    }

    pub fn contains(&self, convention: Convention) -> bool {
        self.by_name.contains_key(convention.name())
    }

    /// Resolve a convention by name (used by embedders reading textual goals).
    pub fn lookup(&self, name: &str) -> Result<Convention, ConfigurationError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownConvention(name.to_string()))
    }

    /// Conventions reachable from `from` through a single registered convertlet.
    pub fn conventions_convertible_to(
        &self,
        from: Convention,
    ) -> Result<Vec<Convention>, ConfigurationError> {
        if !self.contains(from) {
            return Err(ConfigurationError::UnknownConvention(from.name().to_string()));
        }
        Ok(self.edges.get(&from).cloned().unwrap_or_default())
    }

    pub fn can_convert(&self, from: Convention, to: Convention) -> bool {
        self.edges.get(&from).is_some_and(|targets| targets.contains(&to))
    }

    /// Shortest chain of conventions leading from `from` to `to`, both ends included.
    ///
    /// Breadth-first over the conversion graph, visiting edges in registration order so
    /// the chosen path is deterministic. Cycles in the graph are harmless. Returns
    /// `None` when `to` is unreachable or when `from == to` (nothing to convert).
    pub fn conversion_path(&self, from: Convention, to: Convention) -> Option<Vec<Convention>> {
        if from == to {
            return None;
        }
        let mut previous: HashMap<Convention, Convention> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        let mut seen = HashSet::from([from]);

        while let Some(current) = queue.pop_front() {
            for &next in self.edges.get(&current).into_iter().flatten() {
                if !seen.insert(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&p) = previous.get(&cursor) {
                        path.push(p);
                        cursor = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TraitRegistry {
        TraitRegistry::new(
            Convention::builtins().to_vec(),
            [
                (Convention::FEDERATED, Convention::ITERATOR),
                (Convention::ITERATOR, Convention::COMPILED),
                (Convention::COMPILED, Convention::ITERATOR),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_multi_hop_path() {
        let traits = registry();
        let path = traits
            .conversion_path(Convention::FEDERATED, Convention::COMPILED)
            .unwrap();
        assert_eq!(
            path,
            vec![Convention::FEDERATED, Convention::ITERATOR, Convention::COMPILED]
        );
    }

    #[test]
    fn test_cycle_does_not_reach_unconnected_target() {
        let traits = registry();
        assert!(traits
            .conversion_path(Convention::ITERATOR, Convention::FEDERATED)
            .is_none());
        assert!(traits
            .conversion_path(Convention::ITERATOR, Convention::ITERATOR)
            .is_none());
    }

    #[test]
    fn test_unknown_convention_rejected() {
        let err = TraitRegistry::new(
            vec![Convention::ITERATOR],
            [(Convention::ITERATOR, Convention::new("MYSTERY"))],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownConvention(name) if name == "MYSTERY"));

        let traits = registry();
        assert!(traits
            .conventions_convertible_to(Convention::new("MYSTERY"))
            .is_err());
        assert_eq!(
            traits
                .conventions_convertible_to(Convention::ITERATOR)
                .unwrap(),
            vec![Convention::COMPILED]
        );
    }
}
