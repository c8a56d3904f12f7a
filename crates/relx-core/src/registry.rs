//! # Planner Registry
//!
//! Everything the planner consults that is fixed for the lifetime of the process:
//! conventions, convertlets, rules and per-convention implementors. It is assembled
//! through a [`RegistryBuilder`] at startup; `build()` validates the registrations and
//! freezes them into an `Arc<Registry>` that exposes no way to register anything
//! further. Concurrent optimizations share that `Arc`.

use crate::codegen::RelImplementor;
use crate::convention::{Convention, TraitRegistry};
use crate::convertlet::{Convertlet, ConvertletRegistry};
use crate::error::ConfigurationError;
use crate::rule::Rule;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct RegistryBuilder {
    conventions: Vec<Convention>,
    convertlets: ConvertletRegistry,
    rules: Vec<Arc<dyn Rule>>,
    implementors: HashMap<Convention, Arc<dyn RelImplementor>>,
}

impl RegistryBuilder {
    /// An empty builder. Not even `NONE` is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder with the built-in conventions registered.
    pub fn with_builtin_conventions() -> Self {
        Self {
            conventions: Convention::builtins().to_vec(),
            ..Self::default()
        }
    }

    pub fn register_convention(&mut self, convention: Convention) -> Result<&mut Self, ConfigurationError> {
        if self.conventions.iter().any(|c| c.name() == convention.name()) {
            return Err(ConfigurationError::DuplicateConvention(convention.name().to_string()));
        }
        self.conventions.push(convention);
        Ok(self)
    }

    pub fn register_convertlet(
        &mut self,
        convertlet: Arc<dyn Convertlet>,
    ) -> Result<&mut Self, ConfigurationError> {
        self.convertlets.register(convertlet)?;
        Ok(self)
    }

    pub fn register_rule(&mut self, rule: Arc<dyn Rule>) -> Result<&mut Self, ConfigurationError> {
        if self.rules.iter().any(|r| r.name() == rule.name()) {
            return Err(ConfigurationError::DuplicateRule(rule.name().to_string()));
        }
        self.rules.push(rule);
        Ok(self)
    }

    pub fn register_implementor(
        &mut self,
        implementor: Arc<dyn RelImplementor>,
    ) -> Result<&mut Self, ConfigurationError> {
        let convention = implementor.convention();
        if self.implementors.contains_key(&convention) {
            return Err(ConfigurationError::DuplicateImplementor(convention));
        }
        self.implementors.insert(convention, implementor);
        Ok(self)
    }

    /// Validate every registration against the convention set and freeze.
    pub fn build(self) -> Result<Arc<Registry>, ConfigurationError> {
        let known: HashSet<Convention> = self.conventions.iter().copied().collect();
        for &convention in self.implementors.keys() {
            if !known.contains(&convention) {
                return Err(ConfigurationError::UnknownConvention(convention.name().to_string()));
            }
        }
        let traits = TraitRegistry::new(self.conventions, self.convertlets.pairs())?;
        debug!(
            "Built planner registry: {} conventions, {} convertlets, {} rules, {} implementors",
            traits.conventions().len(),
            self.convertlets.len(),
            self.rules.len(),
            self.implementors.len()
        );
        Ok(Arc::new(Registry {
            traits,
            convertlets: self.convertlets,
            rules: self.rules,
            implementors: self.implementors,
        }))
    }
}

/// Immutable planner configuration.
pub struct Registry {
    traits: TraitRegistry,
    convertlets: ConvertletRegistry,
    rules: Vec<Arc<dyn Rule>>,
    implementors: HashMap<Convention, Arc<dyn RelImplementor>>,
}

impl Registry {
    pub fn traits(&self) -> &TraitRegistry {
        &self.traits
    }

    pub fn convertlets(&self) -> &ConvertletRegistry {
        &self.convertlets
    }

    /// Rules in registration order.
    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    pub fn implementor(&self, convention: Convention) -> Option<&dyn RelImplementor> {
        self.implementors.get(&convention).map(|i| i.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CodegenContext;
    use crate::cost::Cost;
    use crate::error::CodegenError;
    use crate::expr::RowType;
    use crate::fragment::Fragment;

    struct Passthrough(Convention, Convention);

    impl Convertlet for Passthrough {
        fn from(&self) -> Convention {
            self.0
        }

        fn to(&self) -> Convention {
            self.1
        }

        fn estimated_cost(&self, _row_type: &RowType, _rows: f64) -> Cost {
            Cost::zero()
        }

        fn realize(&self, child: Fragment, _: &RowType, _: &mut CodegenContext) -> Result<Fragment, CodegenError> {
            Ok(child)
        }
    }

    #[test]
    fn test_duplicate_convertlet_rejected_on_second_registration() {
        let mut builder = RegistryBuilder::with_builtin_conventions();
        builder
            .register_convertlet(Arc::new(Passthrough(Convention::ITERATOR, Convention::COMPILED)))
            .unwrap();
        let err = builder
            .register_convertlet(Arc::new(Passthrough(Convention::ITERATOR, Convention::COMPILED)))
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigurationError::DuplicateConvertlet {
                from: Convention::ITERATOR,
                to: Convention::COMPILED
            }
        );
        // The reverse pair is a different key.
        builder
            .register_convertlet(Arc::new(Passthrough(Convention::COMPILED, Convention::ITERATOR)))
            .unwrap();
        let registry = builder.build().unwrap();
        assert_eq!(registry.convertlets().len(), 2);
    }

    #[test]
    fn test_identity_convertlet_rejected() {
        let mut builder = RegistryBuilder::with_builtin_conventions();
        let err = builder
            .register_convertlet(Arc::new(Passthrough(Convention::COMPILED, Convention::COMPILED)))
            .err()
            .unwrap();
        assert_eq!(err, ConfigurationError::IdentityConvertlet(Convention::COMPILED));
        assert!(builder.build().unwrap().convertlets().is_empty());
    }

    #[test]
    fn test_unknown_convention_detected_at_build() {
        const CUSTOM: Convention = Convention::new("CUSTOM");
        let mut builder = RegistryBuilder::with_builtin_conventions();
        builder
            .register_convertlet(Arc::new(Passthrough(CUSTOM, Convention::ITERATOR)))
            .unwrap();
        let err = builder.build().err().unwrap();
        assert_eq!(err, ConfigurationError::UnknownConvention("CUSTOM".into()));

        let mut builder = RegistryBuilder::with_builtin_conventions();
        builder.register_convention(CUSTOM).unwrap();
        assert!(matches!(
            builder.register_convention(CUSTOM),
            Err(ConfigurationError::DuplicateConvention(_))
        ));
        builder
            .register_convertlet(Arc::new(Passthrough(CUSTOM, Convention::ITERATOR)))
            .unwrap();
        let registry = builder.build().unwrap();
        assert!(registry.traits().can_convert(CUSTOM, Convention::ITERATOR));
    }
}
