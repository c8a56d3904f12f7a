use crate::error::ExecError;
use crate::eval::Row;
use relx_core::expr::TableRef;
use std::collections::HashMap;

/// Supplies table rows to scans and federated fetches.
pub trait RowSource: Send + Sync {
    fn rows(&self, table: &TableRef) -> Result<Vec<Row>, ExecError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRowSource {
    tables: HashMap<String, Vec<Row>>,
}

impl InMemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, rows: Vec<Row>) {
        self.tables.insert(table.to_string(), rows);
    }
}

impl RowSource for InMemoryRowSource {
    fn rows(&self, table: &TableRef) -> Result<Vec<Row>, ExecError> {
        let key = table.to_string();
        self.tables
            .get(&key)
            .cloned()
            .ok_or(ExecError::UnknownTable(key))
    }
}
