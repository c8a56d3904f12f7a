//! # Catalog Interface
//!
//! The catalog gives the planner what it needs about base tables: their row type,
//! their statistics, and whether they are owned by a federated source. It is
//! read-only; schema management lives outside the planner.

use crate::expr::{RowType, TableRef};
use crate::stats::Statistics;
use std::collections::{HashMap, HashSet};

/// Catalog provides row types, statistics and table placement.
pub trait Catalog: Send + Sync {
    fn get_table_stats(&self, table: &TableRef) -> Option<Statistics>;
    fn get_row_type(&self, table: &TableRef) -> Option<RowType>;

    /// Whether the table's rows live in a federated source.
    fn is_federated(&self, _table: &TableRef) -> bool {
        false
    }
}

/// In-memory catalog for tests and the HTTP service.
///
/// Tables are keyed by their fully-qualified name (`schema.table`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    pub table_stats: HashMap<String, Statistics>,
    pub row_types: HashMap<String, RowType>,
    pub federated: HashSet<String>,
}

fn key(table: &TableRef) -> String {
    format!("{}.{}", table.schema, table.name)
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, row_type: RowType, stats: Statistics) {
        let key = key(table);
        self.row_types.insert(key.clone(), row_type);
        self.table_stats.insert(key, stats);
    }

    /// Register a table whose rows are owned by a federated source.
    pub fn add_federated_table(&mut self, table: &TableRef, row_type: RowType, stats: Statistics) {
        self.add_table(table, row_type, stats);
        self.federated.insert(key(table));
    }
}

impl Catalog for InMemoryCatalog {
    fn get_table_stats(&self, table: &TableRef) -> Option<Statistics> {
        self.table_stats.get(&key(table)).cloned()
    }

    fn get_row_type(&self, table: &TableRef) -> Option<RowType> {
        self.row_types.get(&key(table)).cloned()
    }

    fn is_federated(&self, table: &TableRef) -> bool {
        self.federated.contains(&key(table))
    }
}
