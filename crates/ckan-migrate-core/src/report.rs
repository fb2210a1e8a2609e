//! Import reports and the run summary.

use crate::error::Result;
use crate::validity::ValiditySet;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Why a row was not migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Row is soft-deleted and deleted rows are not migrated.
    SoftDeleted,
    /// Row excluded by a customization rule.
    Excluded,
    /// Row references a parent that was not migrated.
    MissingParent,
    /// Target store rejected the write.
    WriteFailed,
    /// The entity's unit of work could not be committed.
    CommitFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SoftDeleted => write!(f, "soft-deleted"),
            SkipReason::Excluded => write!(f, "excluded"),
            SkipReason::MissingParent => write!(f, "missing parent"),
            SkipReason::WriteFailed => write!(f, "write failed"),
            SkipReason::CommitFailed => write!(f, "commit failed"),
        }
    }
}

/// How a migrated row reached the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New row inserted.
    Inserted,
    /// Existing row overwritten.
    Updated,
    /// Existing row left as it was.
    Unchanged,
}

/// Outcome of importing one entity type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// Entity name.
    pub entity: String,
    /// Rows read from the source.
    pub total_rows: u64,
    /// Rows present in the target after the run (inserted, updated or unchanged).
    pub migrated_rows: u64,
    /// Rows inserted.
    pub inserted_rows: u64,
    /// Rows updated.
    pub updated_rows: u64,
    /// Rows already present and kept.
    pub unchanged_rows: u64,
    /// Rows not migrated.
    pub skipped_rows: u64,
    /// Skipped rows by reason.
    pub skipped: BTreeMap<SkipReason, u64>,
    /// Rows migrated under a renamed natural key.
    pub renamed_rows: u64,
    /// Warning messages.
    pub warnings: Vec<String>,
    /// Error messages.
    pub errors: Vec<String>,
    /// Identifiers present in the target, for single-key entities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_ids: Option<ValiditySet>,
}

impl ImportReport {
    /// Create an empty report for an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    /// Count a row as seen.
    pub fn record_seen(&mut self) {
        self.total_rows += 1;
    }

    /// Count a skipped row.
    pub fn record_skip(&mut self, reason: SkipReason) {
        self.skipped_rows += 1;
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    /// Count a migrated row.
    pub fn record_written(&mut self, outcome: WriteOutcome) {
        self.migrated_rows += 1;
        match outcome {
            WriteOutcome::Inserted => self.inserted_rows += 1,
            WriteOutcome::Updated => self.updated_rows += 1,
            WriteOutcome::Unchanged => self.unchanged_rows += 1,
        }
    }

    /// Reclassify every migrated row as skipped, after a failed commit.
    pub fn revoke_migrated(&mut self, reason: SkipReason) {
        let revoked = self.migrated_rows;
        if revoked > 0 {
            self.skipped_rows += revoked;
            *self.skipped.entry(reason).or_insert(0) += revoked;
        }
        self.migrated_rows = 0;
        self.inserted_rows = 0;
        self.updated_rows = 0;
        self.unchanged_rows = 0;
        self.renamed_rows = 0;
        if let Some(ids) = self.valid_ids.as_mut() {
            ids.clear();
        }
    }

    /// Number of skips for a reason.
    pub fn skipped_for(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    /// Every row is accounted for exactly once.
    pub fn is_balanced(&self) -> bool {
        self.total_rows == self.migrated_rows + self.skipped_rows
            && self.migrated_rows == self.inserted_rows + self.updated_rows + self.unchanged_rows
            && self.skipped_rows == self.skipped.values().sum::<u64>()
    }
}

/// State of a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Run in progress.
    Running,
    /// Every selected entity type was imported.
    Complete,
    /// Run stopped on a fatal error.
    Aborted {
        /// Entity being imported when the run stopped.
        entity: String,
        /// Fatal error.
        reason: String,
    },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::Aborted { entity, reason } => {
                write!(f, "aborted during {}: {}", entity, reason)
            }
        }
    }
}

/// Totals across all reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    /// Rows read.
    pub total_rows: u64,
    /// Rows migrated.
    pub migrated_rows: u64,
    /// Rows skipped.
    pub skipped_rows: u64,
    /// Warning messages.
    pub warnings: u64,
    /// Error messages.
    pub errors: u64,
}

/// Combined outcome of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: Option<DateTime<Utc>>,
    /// Run state.
    pub status: RunStatus,
    /// Whether writes were rolled back instead of committed.
    pub dry_run: bool,
    /// Entity names in import order.
    pub order: Vec<String>,
    /// Reports of imported entity types.
    pub reports: BTreeMap<String, ImportReport>,
}

impl RunSummary {
    /// Start a run summary.
    pub fn start(order: Vec<String>, dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            dry_run,
            order,
            reports: BTreeMap::new(),
        }
    }

    /// Add a completed report.
    pub fn push(&mut self, report: ImportReport) {
        self.reports.insert(report.entity.clone(), report);
    }

    /// Mark the run complete.
    pub fn complete(&mut self) {
        self.status = RunStatus::Complete;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run aborted.
    pub fn abort(&mut self, entity: &str, reason: impl Into<String>) {
        self.status = RunStatus::Aborted {
            entity: entity.to_string(),
            reason: reason.into(),
        };
        self.finished_at = Some(Utc::now());
    }

    /// Check if the run stopped on a fatal error.
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, RunStatus::Aborted { .. })
    }

    /// Get the report of an entity.
    pub fn report(&self, entity: &str) -> Option<&ImportReport> {
        self.reports.get(entity)
    }

    /// Reports in import order.
    pub fn ordered_reports(&self) -> impl Iterator<Item = &ImportReport> {
        self.order.iter().filter_map(|name| self.reports.get(name))
    }

    /// Totals across reports.
    pub fn totals(&self) -> RunTotals {
        self.reports.values().fold(RunTotals::default(), |mut t, r| {
            t.total_rows += r.total_rows;
            t.migrated_rows += r.migrated_rows;
            t.skipped_rows += r.skipped_rows;
            t.warnings += r.warnings.len() as u64;
            t.errors += r.errors.len() as u64;
            t
        })
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration {}", self.status)?;
        if self.dry_run {
            writeln!(f, "(dry run, nothing committed)")?;
        }
        for report in self.ordered_reports() {
            writeln!(
                f,
                "{}: {} total, {} migrated ({} inserted, {} updated, {} unchanged), {} skipped",
                report.entity,
                report.total_rows,
                report.migrated_rows,
                report.inserted_rows,
                report.updated_rows,
                report.unchanged_rows,
                report.skipped_rows,
            )?;
            for (reason, count) in &report.skipped {
                writeln!(f, "  skipped ({}): {}", reason, count)?;
            }
            for warning in &report.warnings {
                writeln!(f, "  warning: {}", warning)?;
            }
            for error in &report.errors {
                writeln!(f, "  error: {}", error)?;
            }
        }
        let totals = self.totals();
        write!(
            f,
            "Total: {} rows, {} migrated, {} skipped",
            totals.total_rows, totals.migrated_rows, totals.skipped_rows
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_balance() {
        let mut report = ImportReport::new("users");
        for _ in 0..3 {
            report.record_seen();
        }
        report.record_written(WriteOutcome::Inserted);
        report.record_written(WriteOutcome::Updated);
        report.record_skip(SkipReason::SoftDeleted);

        assert!(report.is_balanced());
        assert_eq!(report.skipped_for(SkipReason::SoftDeleted), 1);
        assert_eq!(report.skipped_for(SkipReason::WriteFailed), 0);
    }

    #[test]
    fn test_revoke_migrated_keeps_balance() {
        let mut report = ImportReport::new("tags");
        report.valid_ids = Some(ValiditySet::from_iter(["t1", "t2"]));
        for _ in 0..3 {
            report.record_seen();
        }
        report.record_written(WriteOutcome::Inserted);
        report.record_written(WriteOutcome::Inserted);
        report.record_skip(SkipReason::MissingParent);

        report.revoke_migrated(SkipReason::CommitFailed);

        assert!(report.is_balanced());
        assert_eq!(report.migrated_rows, 0);
        assert_eq!(report.skipped_for(SkipReason::CommitFailed), 2);
        assert!(report.valid_ids.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_summary_json_shape() {
        let mut summary = RunSummary::start(vec!["users".into()], false);
        let mut report = ImportReport::new("users");
        report.record_seen();
        report.record_skip(SkipReason::Excluded);
        report.warnings.push("renamed".into());
        summary.push(report);
        summary.complete();

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["status"]["state"], "complete");
        assert_eq!(json["reports"]["users"]["total_rows"], 1);
        assert_eq!(json["reports"]["users"]["skipped"]["excluded"], 1);
        assert_eq!(json["reports"]["users"]["warnings"][0], "renamed");
        assert!(json["reports"]["users"].get("valid_ids").is_none());
    }

    #[test]
    fn test_summary_text() {
        let mut summary = RunSummary::start(vec!["users".into()], true);
        let mut report = ImportReport::new("users");
        report.record_seen();
        report.record_skip(SkipReason::WriteFailed);
        report.errors.push("users id=u1: constraint".into());
        summary.push(report);
        summary.abort("groups", "connection refused");

        let text = summary.to_string();
        assert!(text.starts_with("Migration aborted during groups: connection refused"));
        assert!(text.contains("dry run"));
        assert!(text.contains("skipped (write failed): 1"));
        assert!(text.contains("error: users id=u1: constraint"));
        assert!(summary.is_aborted());
    }
}
