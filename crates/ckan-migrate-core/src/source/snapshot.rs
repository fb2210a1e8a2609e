//! Tabular snapshot of the legacy store: one `<table>.csv` per table.

use super::RowSource;
use crate::descriptor::EntityDescriptor;
use crate::error::{Error, Result};
use crate::value::{Row, Value};
use std::path::{Path, PathBuf};

/// Directory of CSV exports with a header row each.
#[derive(Debug, Clone)]
pub struct CsvSnapshot {
    dir: PathBuf,
    notices: Vec<String>,
}

impl CsvSnapshot {
    /// Read tables from a directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            notices: Vec::new(),
        }
    }

    /// Snapshot directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a table's export.
    pub fn path_of(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", table))
    }

    fn read(&self, path: &Path) -> std::result::Result<Vec<Row>, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, field)| (h.clone(), Value::from_csv_field(field)))
                    .collect(),
            );
        }
        Ok(rows)
    }
}

impl RowSource for CsvSnapshot {
    fn fetch(&mut self, entity: &EntityDescriptor) -> Result<Vec<Row>> {
        let path = self.path_of(&entity.table);
        if !path.exists() {
            tracing::warn!(
                entity = %entity.name,
                path = %path.display(),
                "snapshot file not found, no rows to migrate"
            );
            self.notices.push(format!(
                "{}: {} not found, no rows to migrate",
                entity.name,
                path.display()
            ));
            return Ok(Vec::new());
        }

        let rows = self.read(&path).map_err(|e| Error::Source {
            entity: entity.name.clone(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        tracing::debug!(entity = %entity.name, rows = rows.len(), "snapshot loaded");
        Ok(rows)
    }

    fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }
}
