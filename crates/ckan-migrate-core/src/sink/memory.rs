//! In-memory target sink.
//!
//! Tables are plain row vectors. Unique constraints are opt-in, and writes,
//! commits or the whole connection can be made to fail on demand.

use super::{Sink, Statement};
use crate::descriptor::EntityDescriptor;
use crate::error::{Error, Result};
use crate::value::{Row, Value};
use std::collections::{BTreeMap, BTreeSet};

type Tables = BTreeMap<String, Vec<Row>>;

/// In-memory [`Sink`].
#[derive(Debug, Default)]
pub struct MemorySink {
    committed: Tables,
    working: Tables,
    savepoint: Option<Tables>,
    dirty: BTreeSet<String>,
    unique: BTreeMap<String, Vec<Vec<String>>>,
    failing_writes: Vec<(String, String, Value)>,
    failing_lookups: Vec<(String, String, Value)>,
    failing_commits: BTreeSet<String>,
    disconnected: bool,
    commits: u64,
}

impl MemorySink {
    /// Create an empty sink without constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the upsert key and natural key of every descriptor unique.
    pub fn for_catalog(catalog: &[EntityDescriptor]) -> Self {
        catalog.iter().fold(Self::new(), |sink, entity| {
            let key: Vec<&str> = entity.key.iter().map(String::as_str).collect();
            let sink = sink.with_unique(&entity.table, &key);
            match &entity.natural_key {
                Some(natural) => {
                    let mut columns = vec![natural.field.as_str()];
                    columns.extend(natural.scope.iter().map(String::as_str));
                    sink.with_unique(&entity.table, &columns)
                }
                None => sink,
            }
        })
    }

    /// Add a unique constraint. Rows with a null in any constrained column
    /// never conflict.
    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        self.unique
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Reject writes to `table` whose `field` equals `value`.
    pub fn fail_writes_where(
        mut self,
        table: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.failing_writes
            .push((table.to_string(), field.to_string(), value.into()));
        self
    }

    /// Reject existence checks on `table` whose key has `field` equal to
    /// `value`, like a store refusing a malformed key literal.
    pub fn fail_lookups_where(
        mut self,
        table: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.failing_lookups
            .push((table.to_string(), field.to_string(), value.into()));
        self
    }

    /// Reject any commit that includes writes to `table`.
    pub fn fail_commit_for(mut self, table: &str) -> Self {
        self.failing_commits.insert(table.to_string());
        self
    }

    /// Make every following operation fail as if the store went away.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    /// Add a committed row, as if it existed before the run.
    pub fn seed(&mut self, table: &str, row: Row) {
        self.committed
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.working.entry(table.to_string()).or_default().push(row);
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.committed.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of committed rows in a table.
    pub fn count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// Number of successful commits.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    fn check_connected(&self) -> Result<()> {
        if self.disconnected {
            return Err(Error::Connection("memory sink disconnected".to_string()));
        }
        Ok(())
    }

    fn check_injected(&self, table: &str, columns: &[String], values: &[Value]) -> Result<()> {
        for (fail_table, field, value) in &self.failing_writes {
            if fail_table != table {
                continue;
            }
            let hit = columns
                .iter()
                .zip(values)
                .any(|(c, v)| c == field && v == value);
            if hit {
                return Err(Error::Statement(format!(
                    "write rejected: {}.{} = {}",
                    table, field, value
                )));
            }
        }
        Ok(())
    }

    /// Unique constraint violated by `candidate`, ignoring the row at `skip`.
    fn check_unique(&self, table: &str, candidate: &Row, skip: Option<usize>) -> Result<()> {
        let Some(constraints) = self.unique.get(table) else {
            return Ok(());
        };
        let rows = self.working.get(table).map(Vec::as_slice).unwrap_or(&[]);
        for columns in constraints {
            if columns.iter().any(|c| candidate.get(c).is_null()) {
                continue;
            }
            let clash = rows.iter().enumerate().any(|(idx, row)| {
                Some(idx) != skip && columns.iter().all(|c| row.get(c) == candidate.get(c))
            });
            if clash {
                return Err(Error::Statement(format!(
                    "UNIQUE constraint failed: {}.{}",
                    table,
                    columns.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn matches_key(row: &Row, key: &[(String, Value)]) -> bool {
    key.iter().all(|(column, value)| row.get(column) == value)
}

impl Sink for MemorySink {
    fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.check_connected()?;
        match statement {
            Statement::Insert {
                table,
                columns,
                values,
            } => {
                self.check_injected(table, columns, values)?;
                let row: Row = columns.iter().cloned().zip(values.iter().cloned()).collect();
                self.check_unique(table, &row, None)?;
                self.working.entry(table.clone()).or_default().push(row);
                self.dirty.insert(table.clone());
                Ok(1)
            }
            Statement::Update {
                table,
                columns,
                values,
                key,
            } => {
                self.check_injected(table, columns, values)?;
                let positions: Vec<usize> = self
                    .working
                    .get(table)
                    .map(|rows| {
                        rows.iter()
                            .enumerate()
                            .filter(|(_, row)| matches_key(row, key))
                            .map(|(idx, _)| idx)
                            .collect()
                    })
                    .unwrap_or_default();

                for &idx in &positions {
                    let mut updated = self.working[table][idx].clone();
                    for (column, value) in columns.iter().zip(values) {
                        updated.set(column.clone(), value.clone());
                    }
                    self.check_unique(table, &updated, Some(idx))?;
                    if let Some(rows) = self.working.get_mut(table) {
                        rows[idx] = updated;
                    }
                }
                self.dirty.insert(table.clone());
                Ok(positions.len() as u64)
            }
            Statement::Exists { .. } | Statement::Select { .. } => Err(Error::Statement(
                format!("not a write statement on {}", statement.table()),
            )),
        }
    }

    fn fetch(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        self.check_connected()?;
        let rows = self
            .working
            .get(statement.table())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        match statement {
            Statement::Exists { table, key } => {
                let refused = self.failing_lookups.iter().any(|(t, field, value)| {
                    t == table && key.iter().any(|(c, v)| c == field && v == value)
                });
                if refused {
                    return Err(Error::Statement(format!(
                        "invalid key for {}: {:?}",
                        table, key
                    )));
                }
                Ok(rows
                .iter()
                .find(|row| matches_key(row, key))
                .map(|_| vec![Row::new().with("present", 1i64)])
                .unwrap_or_default())
            }
            Statement::Select { columns, .. } => Ok(rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).clone()))
                        .collect()
                })
                .collect()),
            _ => Err(Error::Statement(format!(
                "not a read statement on {}",
                statement.table()
            ))),
        }
    }

    fn savepoint(&mut self) -> Result<()> {
        self.check_connected()?;
        self.savepoint = Some(self.working.clone());
        Ok(())
    }

    fn rollback_to_savepoint(&mut self) -> Result<()> {
        self.check_connected()?;
        if let Some(snapshot) = self.savepoint.take() {
            self.working = snapshot;
        }
        Ok(())
    }

    fn release_savepoint(&mut self) -> Result<()> {
        self.check_connected()?;
        self.savepoint = None;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check_connected()?;
        if let Some(table) = self.dirty.iter().find(|t| self.failing_commits.contains(*t)) {
            let err = Error::Statement(format!("commit rejected for {}", table));
            self.rollback()?;
            return Err(err);
        }
        self.committed = self.working.clone();
        self.dirty.clear();
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.check_connected()?;
        self.working = self.committed.clone();
        self.savepoint = None;
        self.dirty.clear();
        Ok(())
    }
}
