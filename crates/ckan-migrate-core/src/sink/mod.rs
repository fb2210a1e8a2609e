//! Target sinks.
//!
//! The engine talks to the target store only through [`Sink`]: execute a
//! parameterized [`Statement`], fetch rows, and manage the unit of work with
//! a per-row savepoint inside it.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

pub use memory::MemorySink;
#[cfg(feature = "postgres")]
pub use postgres::PgSink;
pub use sqlite::{SqliteSink, TARGET_SCHEMA};

use crate::error::Result;
use crate::value::{Row, Value};

/// SQL flavor used when rendering statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?N` placeholders, `IS` for null-safe comparison.
    Sqlite,
    /// `$N` placeholders, `IS NOT DISTINCT FROM` for null-safe comparison.
    Postgres,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", index),
            Dialect::Postgres => format!("${}", index),
        }
    }

    fn null_safe_eq(self) -> &'static str {
        match self {
            Dialect::Sqlite => "IS",
            Dialect::Postgres => "IS NOT DISTINCT FROM",
        }
    }
}

/// A parameterized write or read against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Insert one row.
    Insert {
        /// Target table.
        table: String,
        /// Columns in order.
        columns: Vec<String>,
        /// Values matching `columns`.
        values: Vec<Value>,
    },
    /// Overwrite the row with the given key.
    Update {
        /// Target table.
        table: String,
        /// Columns in order.
        columns: Vec<String>,
        /// Values matching `columns`.
        values: Vec<Value>,
        /// Key columns and values.
        key: Vec<(String, Value)>,
    },
    /// Does a row with the given key exist.
    Exists {
        /// Target table.
        table: String,
        /// Key columns and values.
        key: Vec<(String, Value)>,
    },
    /// Read the given columns of every row.
    Select {
        /// Target table.
        table: String,
        /// Columns to read.
        columns: Vec<String>,
    },
}

impl Statement {
    /// Insert the given fields of a row.
    pub fn insert(table: &str, fields: &[String], row: &Row) -> Self {
        Statement::Insert {
            table: table.to_string(),
            columns: fields.to_vec(),
            values: fields.iter().map(|f| row.get(f).clone()).collect(),
        }
    }

    /// Update the given fields of the row matching `key_fields`.
    pub fn update(table: &str, fields: &[String], key_fields: &[String], row: &Row) -> Self {
        Statement::Update {
            table: table.to_string(),
            columns: fields.to_vec(),
            values: fields.iter().map(|f| row.get(f).clone()).collect(),
            key: key_pairs(key_fields, row),
        }
    }

    /// Existence check for the row matching `key_fields`.
    pub fn exists(table: &str, key_fields: &[String], row: &Row) -> Self {
        Statement::Exists {
            table: table.to_string(),
            key: key_pairs(key_fields, row),
        }
    }

    /// Read columns of every row.
    pub fn select(table: &str, columns: &[String]) -> Self {
        Statement::Select {
            table: table.to_string(),
            columns: columns.to_vec(),
        }
    }

    /// Table the statement addresses.
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Exists { table, .. }
            | Statement::Select { table, .. } => table,
        }
    }

    /// Render SQL text and its parameters in order.
    pub fn render(&self, dialect: Dialect) -> (String, Vec<&Value>) {
        self.render_with(dialect, |_, placeholder| placeholder)
    }

    /// Render SQL, letting `bind` decorate the placeholder for each column
    /// (the Postgres sink adds type casts).
    pub fn render_with(
        &self,
        dialect: Dialect,
        bind: impl Fn(&str, String) -> String,
    ) -> (String, Vec<&Value>) {
        let mut params: Vec<&Value> = Vec::new();

        match self {
            Statement::Insert {
                table,
                columns,
                values,
            } => {
                let mut holders = Vec::with_capacity(values.len());
                for (column, value) in columns.iter().zip(values) {
                    params.push(value);
                    holders.push(bind(column, dialect.placeholder(params.len())));
                }
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(table),
                    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
                    holders.join(", ")
                );
                (sql, params)
            }
            Statement::Update {
                table,
                columns,
                values,
                key,
            } => {
                let mut sets = Vec::with_capacity(values.len());
                for (column, value) in columns.iter().zip(values) {
                    params.push(value);
                    let holder = bind(column, dialect.placeholder(params.len()));
                    sets.push(format!("{} = {}", quote(column), holder));
                }
                let predicate = render_key(dialect, key, &mut params, &bind);
                let sql = format!(
                    "UPDATE {} SET {} WHERE {}",
                    quote(table),
                    sets.join(", "),
                    predicate
                );
                (sql, params)
            }
            Statement::Exists { table, key } => {
                let predicate = render_key(dialect, key, &mut params, &bind);
                let sql = format!(
                    "SELECT 1 AS present FROM {} WHERE {} LIMIT 1",
                    quote(table),
                    predicate
                );
                (sql, params)
            }
            Statement::Select { table, columns } => {
                let list = columns
                    .iter()
                    .map(|c| match dialect {
                        Dialect::Sqlite => quote(c),
                        Dialect::Postgres => format!("{}::text AS {}", quote(c), quote(c)),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                (format!("SELECT {} FROM {}", list, quote(table)), params)
            }
        }
    }
}

fn key_pairs(key_fields: &[String], row: &Row) -> Vec<(String, Value)> {
    key_fields
        .iter()
        .map(|f| (f.clone(), row.get(f).clone()))
        .collect()
}

fn render_key<'a>(
    dialect: Dialect,
    key: &'a [(String, Value)],
    params: &mut Vec<&'a Value>,
    bind: &impl Fn(&str, String) -> String,
) -> String {
    let mut clauses = Vec::with_capacity(key.len());
    for (column, value) in key {
        params.push(value);
        let holder = bind(column, dialect.placeholder(params.len()));
        clauses.push(format!("{} {} {}", quote(column), dialect.null_safe_eq(), holder));
    }
    clauses.join(" AND ")
}

/// Quote an identifier.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Access to the target store.
///
/// Writes between [`commit`](Sink::commit) calls form one unit of work. Each
/// row write is bracketed by a savepoint so a rejected statement can be undone
/// without losing the rows accepted before it.
pub trait Sink {
    /// Execute a write; returns the number of affected rows.
    fn execute(&mut self, statement: &Statement) -> Result<u64>;

    /// Execute a read.
    fn fetch(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    /// Does a row with this key exist.
    fn exists(&mut self, table: &str, key: &[(String, Value)]) -> Result<bool> {
        let statement = Statement::Exists {
            table: table.to_string(),
            key: key.to_vec(),
        };
        Ok(!self.fetch(&statement)?.is_empty())
    }

    /// Open a row-level savepoint.
    fn savepoint(&mut self) -> Result<()>;

    /// Undo everything since the savepoint and discard it.
    fn rollback_to_savepoint(&mut self) -> Result<()>;

    /// Keep everything since the savepoint and discard it.
    fn release_savepoint(&mut self) -> Result<()>;

    /// Commit the unit of work.
    fn commit(&mut self) -> Result<()>;

    /// Abandon the unit of work.
    fn rollback(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Row {
        Row::new()
            .with("id", "u1")
            .with("name", "alice")
            .with("email", "a@x.com")
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_render_insert() {
        let stmt = Statement::insert("user", &fields(&["id", "name"]), &user());
        let (sql, params) = stmt.render(Dialect::Sqlite);
        assert_eq!(sql, r#"INSERT INTO "user" ("id", "name") VALUES (?1, ?2)"#);
        assert_eq!(params, vec![&Value::from("u1"), &Value::from("alice")]);
    }

    #[test]
    fn test_render_update_with_composite_key() {
        let row = Row::new()
            .with("follower_id", "u1")
            .with("object_id", "g1")
            .with("datetime", "2017-01-01");
        let stmt = Statement::update(
            "user_following_group",
            &fields(&["follower_id", "object_id", "datetime"]),
            &fields(&["follower_id", "object_id"]),
            &row,
        );
        let (sql, params) = stmt.render(Dialect::Postgres);
        assert_eq!(
            sql,
            concat!(
                r#"UPDATE "user_following_group" SET "follower_id" = $1, "object_id" = $2, "datetime" = $3 "#,
                r#"WHERE "follower_id" IS NOT DISTINCT FROM $4 AND "object_id" IS NOT DISTINCT FROM $5"#
            )
        );
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_render_exists_and_select() {
        let stmt = Statement::exists("user", &fields(&["id"]), &user());
        let (sql, params) = stmt.render(Dialect::Sqlite);
        assert_eq!(sql, r#"SELECT 1 AS present FROM "user" WHERE "id" IS ?1 LIMIT 1"#);
        assert_eq!(params, vec![&Value::from("u1")]);

        let (sql, _) = Statement::select("tag", &fields(&["id", "name"])).render(Dialect::Postgres);
        assert_eq!(sql, r#"SELECT "id"::text AS "id", "name"::text AS "name" FROM "tag""#);
    }

    #[test]
    fn test_render_with_casts() {
        let stmt = Statement::insert("user", &fields(&["id", "created"]), &user());
        let (sql, _) = stmt.render_with(Dialect::Postgres, |column, holder| {
            if column == "created" {
                format!("{}::timestamp", holder)
            } else {
                holder
            }
        });
        assert_eq!(sql, r#"INSERT INTO "user" ("id", "created") VALUES ($1, $2::timestamp)"#);
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("order"), "\"order\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }
}
