//! In-memory rows.

use super::RowSource;
use crate::descriptor::EntityDescriptor;
use crate::error::{Error, Result};
use crate::value::Row;
use std::collections::{BTreeMap, BTreeSet};

/// Rows held in memory, keyed by table.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: BTreeMap<String, Vec<Row>>,
    unreadable: BTreeSet<String>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rows of a table.
    pub fn with_table(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    /// Append one row to a table.
    pub fn push(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Make reads of a table fail.
    pub fn unreadable(mut self, table: &str) -> Self {
        self.unreadable.insert(table.to_string());
        self
    }
}

impl RowSource for MemorySource {
    fn fetch(&mut self, entity: &EntityDescriptor) -> Result<Vec<Row>> {
        if self.unreadable.contains(&entity.table) {
            return Err(Error::Source {
                entity: entity.name.clone(),
                reason: format!("table {} is unreadable", entity.table),
            });
        }
        Ok(self.tables.get(&entity.table).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_by_table() {
        let users = EntityDescriptor::new("users", "user");
        let mut source = MemorySource::new().with_table("user", vec![Row::new().with("id", "u1")]);
        source.push("user", Row::new().with("id", "u2"));

        let rows = source.fetch(&users).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_str("id"), Some("u2"));
        assert!(source
            .fetch(&EntityDescriptor::new("tags", "tag"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unreadable_table() {
        let users = EntityDescriptor::new("users", "user");
        let mut source = MemorySource::new().unreadable("user");
        assert!(matches!(source.fetch(&users), Err(Error::Source { .. })));
    }
}
