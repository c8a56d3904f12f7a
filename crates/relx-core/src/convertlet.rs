//! # Convertlets
//!
//! A convertlet knows how to bridge one ordered pair of calling conventions. The
//! planner uses it twice: during search to price a converter node, and during code
//! generation to turn the child's fragment into a fragment in the target convention.
//!
//! Convertlets are stateless. Any fresh names they need come from the
//! [`CodegenContext`] owned by the code generator, so `realize` depends only on its
//! arguments.

use crate::codegen::CodegenContext;
use crate::convention::Convention;
use crate::cost::Cost;
use crate::error::{CodegenError, ConfigurationError, NoConversionPath};
use crate::expr::RowType;
use crate::fragment::Fragment;
use std::collections::HashMap;
use std::sync::Arc;

pub trait Convertlet: Send + Sync {
    fn from(&self) -> Convention;
    fn to(&self) -> Convention;

    /// Local cost of converting `rows` rows of `row_type`. Must be non-negative.
    fn estimated_cost(&self, row_type: &RowType, rows: f64) -> Cost;

    /// Produce the fragment in `to()` from the child's fragment in `from()`.
    fn realize(
        &self,
        child: Fragment,
        row_type: &RowType,
        cx: &mut CodegenContext,
    ) -> Result<Fragment, CodegenError>;
}

/// Convertlets keyed by (from, to), at most one per pair.
#[derive(Default, Clone)]
pub struct ConvertletRegistry {
    entries: Vec<Arc<dyn Convertlet>>,
    by_pair: HashMap<(Convention, Convention), usize>,
}

impl ConvertletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, convertlet: Arc<dyn Convertlet>) -> Result<(), ConfigurationError> {
        let pair = (convertlet.from(), convertlet.to());
        if pair.0 == pair.1 {
            return Err(ConfigurationError::IdentityConvertlet(pair.0));
        }
        if self.by_pair.contains_key(&pair) {
            return Err(ConfigurationError::DuplicateConvertlet {
                from: pair.0,
                to: pair.1,
            });
        }
        self.by_pair.insert(pair, self.entries.len());
        self.entries.push(convertlet);
        Ok(())
    }

    pub fn lookup(&self, from: Convention, to: Convention) -> Result<&dyn Convertlet, NoConversionPath> {
        self.by_pair
            .get(&(from, to))
            .map(|&i| self.entries[i].as_ref())
            .ok_or(NoConversionPath { from, to })
    }

    /// Registered pairs in registration order.
    pub fn pairs(&self) -> impl Iterator<Item = (Convention, Convention)> + '_ {
        self.entries.iter().map(|c| (c.from(), c.to()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
