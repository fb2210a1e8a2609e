//! Output formatters for run summaries.

use ckan_migrate_core::RunSummary;
use clap::ValueEnum;
use comfy_table::{Cell, Table};

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// Plain text, one line per entity
    Text,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Text => write!(f, "text"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format a run summary.
    fn format_summary(&self, summary: &RunSummary) -> String;

    /// Format an import plan.
    fn format_plan(&self, order: &[String]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Text => Box::new(TextFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_summary(&self, summary: &RunSummary) -> String {
        let mut table = Table::new();
        table.set_header(vec![
            "Entity",
            "Total",
            "Migrated",
            "Inserted",
            "Updated",
            "Unchanged",
            "Skipped",
            "Renamed",
            "Warnings",
            "Errors",
        ]);

        for report in summary.ordered_reports() {
            table.add_row(vec![
                Cell::new(&report.entity),
                Cell::new(report.total_rows),
                Cell::new(report.migrated_rows),
                Cell::new(report.inserted_rows),
                Cell::new(report.updated_rows),
                Cell::new(report.unchanged_rows),
                Cell::new(report.skipped_rows),
                Cell::new(report.renamed_rows),
                Cell::new(report.warnings.len()),
                Cell::new(report.errors.len()),
            ]);
        }

        let totals = summary.totals();
        table.add_row(vec![
            Cell::new("total"),
            Cell::new(totals.total_rows),
            Cell::new(totals.migrated_rows),
            Cell::new(""),
            Cell::new(""),
            Cell::new(""),
            Cell::new(totals.skipped_rows),
            Cell::new(""),
            Cell::new(totals.warnings),
            Cell::new(totals.errors),
        ]);

        let mut output = table.to_string();
        output.push_str(&format!("\n\nStatus: {}", summary.status));
        if summary.dry_run {
            output.push_str(" (dry run, nothing committed)");
        }

        for report in summary.ordered_reports() {
            for warning in &report.warnings {
                output.push_str(&format!("\nwarning: {}", warning));
            }
            for error in &report.errors {
                output.push_str(&format!("\nerror: {}", error));
            }
        }

        output
    }

    fn format_plan(&self, order: &[String]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["#", "Entity"]);
        for (i, name) in order.iter().enumerate() {
            table.add_row(vec![Cell::new(i + 1), Cell::new(name)]);
        }
        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_summary(&self, summary: &RunSummary) -> String {
        summary
            .to_json()
            .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }

    fn format_plan(&self, order: &[String]) -> String {
        serde_json::to_string_pretty(order).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Plain text formatter.
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_summary(&self, summary: &RunSummary) -> String {
        summary.to_string()
    }

    fn format_plan(&self, order: &[String]) -> String {
        order.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckan_migrate_core::{ImportReport, SkipReason, WriteOutcome};

    fn summary() -> RunSummary {
        let mut summary = RunSummary::start(vec!["users".into(), "packages".into()], false);

        let mut users = ImportReport::new("users");
        users.record_seen();
        users.record_written(WriteOutcome::Inserted);
        users.renamed_rows = 1;
        users
            .warnings
            .push("users u2: email 'a@x.org' already in use, renamed".into());
        summary.push(users);

        let mut packages = ImportReport::new("packages");
        packages.record_seen();
        packages.record_skip(SkipReason::MissingParent);
        packages.errors.push("packages p1: missing parent users".into());
        summary.push(packages);

        summary.complete();
        summary
    }

    #[test]
    fn test_table_summary() {
        let output = TableFormatter.format_summary(&summary());
        assert!(output.contains("Entity"));
        assert!(output.contains("users"));
        assert!(output.contains("packages"));
        assert!(output.contains("Status: complete"));
        assert!(output.contains("warning: users u2"));
        assert!(output.contains("error: packages p1"));
    }

    #[test]
    fn test_json_summary() {
        let output = JsonFormatter.format_summary(&summary());
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["reports"]["users"]["migrated_rows"], 1);
        assert_eq!(parsed["status"]["state"], "complete");
    }

    #[test]
    fn test_plan_formats() {
        let order = vec!["users".to_string(), "packages".to_string()];
        assert_eq!(TextFormatter.format_plan(&order), "users\npackages");
        assert!(TableFormatter.format_plan(&order).contains("packages"));
        let parsed: Vec<String> =
            serde_json::from_str(&JsonFormatter.format_plan(&order)).unwrap();
        assert_eq!(parsed, order);
    }

    #[test]
    fn test_text_summary() {
        let output = TextFormatter.format_summary(&summary());
        assert!(output.starts_with("Migration complete"));
    }
}
