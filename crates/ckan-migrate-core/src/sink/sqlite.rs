//! SQLite target sink.

use super::{Dialect, Sink, Statement};
use crate::error::{Error, Result};
use crate::value::{Row, Value, TIMESTAMP_FORMAT};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;

/// DDL for the CKAN 2.11 target tables written by the migration.
pub const TARGET_SCHEMA: &str = include_str!("schema.sql");

const ROW_SAVEPOINT: &str = "migrate_row";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*b as i64)),
            Value::Int(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Float(x) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*x)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(t) => ToSqlOutput::Owned(rusqlite::types::Value::Text(
                t.format(TIMESTAMP_FORMAT).to_string(),
            )),
            Value::TextArray(items) => {
                let json = serde_json::to_string(items)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                ToSqlOutput::Owned(rusqlite::types::Value::Text(json))
            }
        })
    }
}

/// Convert a SQLite column value.
pub(crate) fn value_from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(x) => Value::Float(x),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Run a query and collect rows keyed by column name.
pub(crate) fn query_rows(conn: &Connection, sql: &str, params: &[&Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (idx, column) in columns.iter().enumerate() {
            record.set(column.clone(), value_from_sqlite(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(out)
}

/// Target sink over a SQLite database.
pub struct SqliteSink {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteSink {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            Error::Connection(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            in_transaction: false,
        }
    }

    /// Create the target tables if they do not exist.
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(TARGET_SCHEMA)?;
        Ok(())
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Count rows of a table.
    pub fn count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", super::quote(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

impl Sink for SqliteSink {
    fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.begin()?;
        let (sql, params) = statement.render(Dialect::Sqlite);
        let affected = self
            .conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(|e| Error::Statement(e.to_string()))?;
        Ok(affected as u64)
    }

    fn fetch(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        let (sql, params) = statement.render(Dialect::Sqlite);
        query_rows(&self.conn, &sql, &params)
    }

    fn savepoint(&mut self) -> Result<()> {
        self.begin()?;
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", ROW_SAVEPOINT))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
            ROW_SAVEPOINT
        ))?;
        Ok(())
    }

    fn release_savepoint(&mut self) -> Result<()> {
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {}", ROW_SAVEPOINT))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("ROLLBACK")?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> SqliteSink {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.init_schema().unwrap();
        sink
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn vocabulary(id: &str, name: &str) -> Row {
        Row::new().with("id", id).with("name", name)
    }

    #[test]
    fn test_insert_and_exists() {
        let mut sink = sink();
        let cols = fields(&["id", "name"]);
        sink.execute(&Statement::insert("vocabulary", &cols, &vocabulary("v1", "genre")))
            .unwrap();
        sink.commit().unwrap();

        let key = vec![("id".to_string(), Value::from("v1"))];
        assert!(sink.exists("vocabulary", &key).unwrap());
        let missing = vec![("id".to_string(), Value::from("v2"))];
        assert!(!sink.exists("vocabulary", &missing).unwrap());
    }

    #[test]
    fn test_savepoint_undoes_only_current_row() {
        let mut sink = sink();
        let cols = fields(&["id", "name"]);

        sink.savepoint().unwrap();
        sink.execute(&Statement::insert("vocabulary", &cols, &vocabulary("v1", "genre")))
            .unwrap();
        sink.release_savepoint().unwrap();

        sink.savepoint().unwrap();
        let err = sink
            .execute(&Statement::insert("vocabulary", &cols, &vocabulary("v2", "genre")))
            .unwrap_err();
        assert!(matches!(err, Error::Statement(_)));
        sink.rollback_to_savepoint().unwrap();

        sink.commit().unwrap();
        assert_eq!(sink.count("vocabulary").unwrap(), 1);
    }

    #[test]
    fn test_rollback_discards_unit_of_work() {
        let mut sink = sink();
        let cols = fields(&["id", "name"]);
        sink.execute(&Statement::insert("vocabulary", &cols, &vocabulary("v1", "genre")))
            .unwrap();
        sink.rollback().unwrap();
        assert_eq!(sink.count("vocabulary").unwrap(), 0);
    }

    #[test]
    fn test_value_conversion() {
        let mut sink = sink();
        let row = Row::new()
            .with("id", "a1")
            .with("permission_labels", Value::TextArray(vec!["public".into()]));
        sink.execute(&Statement::insert("activity", &fields(&["id", "permission_labels"]), &row))
            .unwrap();

        let rows = sink
            .fetch(&Statement::select("activity", &fields(&["permission_labels"])))
            .unwrap();
        assert_eq!(rows[0].get_str("permission_labels"), Some(r#"["public"]"#));
    }
}
