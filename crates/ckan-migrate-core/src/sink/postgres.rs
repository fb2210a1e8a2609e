//! PostgreSQL target sink.
//!
//! Drives a single sqlx connection from a current-thread tokio runtime so the
//! engine can stay synchronous. Placeholders are cast to the column's declared
//! type, letting text snapshots land in timestamp, boolean or array columns.

use super::{Dialect, Sink, Statement, TARGET_SCHEMA};
use crate::error::{Error, Result};
use crate::value::{Row, Value};
use sqlx::postgres::{PgArguments, PgConnection};
use sqlx::query::Query;
use sqlx::{Column, Connection, Postgres, Row as _};
use std::collections::HashMap;
use tokio::runtime::Runtime;

const ROW_SAVEPOINT: &str = "migrate_row";

/// Target sink over a PostgreSQL database.
pub struct PgSink {
    conn: PgConnection,
    rt: Runtime,
    in_transaction: bool,
    column_types: HashMap<String, HashMap<String, String>>,
}

impl PgSink {
    /// Connect to a database URL.
    pub fn connect(url: &str) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Connection(format!("cannot start runtime: {}", e)))?;
        let conn = rt
            .block_on(PgConnection::connect(url))
            .map_err(|e| Error::Connection(e.to_string()))?;
        tracing::info!("connected to postgres target");

        Ok(Self {
            conn,
            rt,
            in_transaction: false,
            column_types: HashMap::new(),
        })
    }

    /// Create the target tables if they do not exist.
    pub fn init_schema(&mut self) -> Result<()> {
        self.rt
            .block_on(sqlx::raw_sql(TARGET_SCHEMA).execute(&mut self.conn))
            .map_err(map_err)?;
        Ok(())
    }

    fn batch(&mut self, sql: &str) -> Result<()> {
        self.rt
            .block_on(sqlx::raw_sql(sql).execute(&mut self.conn))
            .map_err(map_err)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Declared type of every column of a table, cached per table.
    fn types_of(&mut self, table: &str) -> Result<HashMap<String, String>> {
        if let Some(types) = self.column_types.get(table) {
            return Ok(types.clone());
        }
        let rows: Vec<(String, String)> = self
            .rt
            .block_on(
                sqlx::query_as(
                    "SELECT column_name::text, udt_name::text FROM information_schema.columns \
                     WHERE table_schema = current_schema() AND table_name = $1",
                )
                .bind(table)
                .fetch_all(&mut self.conn),
            )
            .map_err(map_err)?;
        let types: HashMap<String, String> = rows.into_iter().collect();
        self.column_types.insert(table.to_string(), types.clone());
        Ok(types)
    }

    fn render(&mut self, statement: &Statement) -> Result<(String, Vec<Value>)> {
        let types = self.types_of(statement.table())?;
        let (sql, params) = statement.render_with(Dialect::Postgres, |column, holder| {
            match types.get(column) {
                Some(udt) if is_type_name(udt) => format!("{}::{}", holder, udt),
                _ => holder,
            }
        });
        Ok((sql, params.into_iter().cloned().collect()))
    }
}

fn is_type_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Database-side rejections are statement errors, everything else means the
/// connection is unusable.
fn map_err(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::Database(db) => Error::Statement(db.to_string()),
        other => Error::Postgres(other),
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(x) => query.bind(*x),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Timestamp(t) => query.bind(*t),
        Value::TextArray(items) => query.bind(items.clone()),
    }
}

impl Sink for PgSink {
    fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.begin()?;
        let (sql, params) = self.render(statement)?;
        let query = params
            .iter()
            .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
        let result = self
            .rt
            .block_on(query.execute(&mut self.conn))
            .map_err(map_err)?;
        Ok(result.rows_affected())
    }

    fn fetch(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        let (sql, params) = self.render(statement)?;
        let query = params
            .iter()
            .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
        let rows = self
            .rt
            .block_on(query.fetch_all(&mut self.conn))
            .map_err(map_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = Row::new();
            for (idx, column) in row.columns().iter().enumerate() {
                let text: Option<String> = row.try_get(idx).map_err(map_err)?;
                record.set(column.name(), Value::from(text));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn exists(&mut self, table: &str, key: &[(String, Value)]) -> Result<bool> {
        let statement = Statement::Exists {
            table: table.to_string(),
            key: key.to_vec(),
        };
        let (sql, params) = self.render(&statement)?;
        let query = params
            .iter()
            .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
        let found = self
            .rt
            .block_on(query.fetch_optional(&mut self.conn))
            .map_err(map_err)?;
        Ok(found.is_some())
    }

    fn savepoint(&mut self) -> Result<()> {
        self.begin()?;
        self.batch(&format!("SAVEPOINT {}", ROW_SAVEPOINT))
    }

    fn rollback_to_savepoint(&mut self) -> Result<()> {
        self.batch(&format!(
            "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
            ROW_SAVEPOINT
        ))
    }

    fn release_savepoint(&mut self) -> Result<()> {
        self.batch(&format!("RELEASE SAVEPOINT {}", ROW_SAVEPOINT))
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.batch("ROLLBACK")?;
        }
        Ok(())
    }
}
