//! Live reads from a legacy SQLite database.

use super::RowSource;
use crate::descriptor::EntityDescriptor;
use crate::error::{Error, Result};
use crate::sink::quote;
use crate::sink::sqlite::query_rows;
use crate::value::Row;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Legacy store opened read-only.
pub struct SqliteSource {
    conn: Connection,
    notices: Vec<String>,
}

impl SqliteSource {
    /// Open an existing database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| Error::Connection(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            notices: Vec::new(),
        }
    }

    fn has_table(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// `SELECT *` over a table in the entity's source order.
pub fn select_sql(entity: &EntityDescriptor) -> String {
    let mut sql = format!("SELECT * FROM {}", quote(&entity.table));
    if !entity.source_order.is_empty() {
        let order: Vec<String> = entity.source_order.iter().map(|c| quote(c)).collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    sql
}

impl RowSource for SqliteSource {
    fn fetch(&mut self, entity: &EntityDescriptor) -> Result<Vec<Row>> {
        let source_error = |e: Error| Error::Source {
            entity: entity.name.clone(),
            reason: e.to_string(),
        };

        if !self.has_table(&entity.table).map_err(source_error)? {
            tracing::warn!(entity = %entity.name, table = %entity.table, "source table not found");
            self.notices.push(format!(
                "{}: source table {} not found, no rows to migrate",
                entity.name, entity.table
            ));
            return Ok(Vec::new());
        }
        let rows = query_rows(&self.conn, &select_sql(entity), &[]).map_err(source_error)?;
        tracing::debug!(entity = %entity.name, rows = rows.len(), "source rows read");
        Ok(rows)
    }

    fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn legacy() -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE resource (id TEXT, url TEXT, created TEXT, size INTEGER);
            INSERT INTO resource VALUES ('r2', 'http://b', '2017-02-01', 20);
            INSERT INTO resource VALUES ('r1', 'http://a', '2017-01-01', NULL);
            "#,
        )
        .unwrap();
        SqliteSource::from_connection(conn)
    }

    #[test]
    fn test_select_sql() {
        let entity = EntityDescriptor::new("resource_views", "resource_view").ordered_by(&["order"]);
        assert_eq!(
            select_sql(&entity),
            r#"SELECT * FROM "resource_view" ORDER BY "order""#
        );
        assert_eq!(
            select_sql(&EntityDescriptor::new("tags", "tag")),
            r#"SELECT * FROM "tag""#
        );
    }

    #[test]
    fn test_rows_in_source_order() {
        let entity = EntityDescriptor::new("resources", "resource").ordered_by(&["created"]);
        let rows = legacy().fetch(&entity).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_str("id"), Some("r1"));
        assert!(rows[0].get("size").is_null());
        assert_eq!(rows[1].get("size"), &Value::Int(20));
    }

    #[test]
    fn test_missing_table_is_empty() {
        let mut source = legacy();
        let rows = source.fetch(&EntityDescriptor::new("tags", "tag")).unwrap();
        assert!(rows.is_empty());
        assert_eq!(
            source.take_notices(),
            vec!["tags: source table tag not found, no rows to migrate".to_string()]
        );

        source
            .fetch(&EntityDescriptor::new("resources", "resource"))
            .unwrap();
        assert!(source.take_notices().is_empty());
    }
}
