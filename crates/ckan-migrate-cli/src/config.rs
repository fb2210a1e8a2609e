//! Command-line arguments and the run configuration built from them.

use crate::formatter::OutputFormat;
use chrono::NaiveDate;
use ckan_migrate_core::ckan;
use ckan_migrate_core::resolver::DEFAULT_MAX_TRIES;
use ckan_migrate_core::{
    CsvSnapshot, EntityDescriptor, MigrationConfig, RowSource, Sink, SqliteSink, SqliteSource,
};
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

/// Default path of the archived run summary.
pub const DEFAULT_SUMMARY_PATH: &str = "migration.log.json";

/// Command-line errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Neither a snapshot directory nor a legacy database was given.
    #[error("no source given, use --source-csv or --source-sqlite")]
    MissingSource,

    /// No target store was given.
    #[error("no target given, use --target-sqlite or --target-postgres")]
    MissingTarget,

    /// PostgreSQL target requested from a build without it.
    #[error("this build has no postgres support, rebuild with --features postgres")]
    PostgresUnavailable,

    /// Engine error.
    #[error(transparent)]
    Core(#[from] ckan_migrate_core::Error),
}

/// Where legacy rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Directory of `<table>.csv` exports.
    Csv(PathBuf),
    /// Legacy SQLite database.
    Sqlite(PathBuf),
}

/// Where migrated rows go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// SQLite database file.
    Sqlite(PathBuf),
    /// PostgreSQL connection URL.
    Postgres(String),
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "ckan-migrate")]
#[command(version, about = "Migrate a legacy CKAN database into the 2.11 schema", long_about = None)]
pub struct Args {
    /// Directory of CSV exports of the legacy tables.
    #[arg(long, conflicts_with = "source_sqlite")]
    pub source_csv: Option<PathBuf>,

    /// Legacy SQLite database, read in place.
    #[arg(long)]
    pub source_sqlite: Option<PathBuf>,

    /// Target SQLite database.
    #[arg(long, conflicts_with = "target_postgres")]
    pub target_sqlite: Option<PathBuf>,

    /// Target PostgreSQL URL.
    #[arg(long)]
    pub target_postgres: Option<String>,

    /// Create the target tables before migrating.
    #[arg(long)]
    pub init_schema: bool,

    /// Do not migrate soft-deleted rows of any entity.
    #[arg(long)]
    pub skip_deleted: bool,

    /// Do not migrate soft-deleted rows of these entities.
    #[arg(long, value_delimiter = ',')]
    pub skip_deleted_for: Vec<String>,

    /// Migrate only these entities.
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Leave these entities out.
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Deterministic rename candidates before falling back to a random suffix.
    #[arg(long, default_value_t = DEFAULT_MAX_TRIES)]
    pub max_rename_tries: usize,

    /// Leave users with a profile description behind.
    #[arg(long)]
    pub exclude_users_with_about: bool,

    /// Leave users created after this date (YYYY-MM-DD) behind.
    #[arg(long)]
    pub exclude_users_created_after: Option<NaiveDate>,

    /// Roll back every write instead of committing.
    #[arg(long)]
    pub dry_run: bool,

    /// Where to write the JSON run summary.
    #[arg(long, default_value = DEFAULT_SUMMARY_PATH)]
    pub summary: PathBuf,

    /// Also write logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the import order and exit.
    #[arg(long)]
    pub plan: bool,

    /// Report format.
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

/// Everything a run needs, resolved from the arguments.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Legacy rows.
    pub source: Option<SourceKind>,
    /// Target store.
    pub target: Option<TargetKind>,
    /// Create target tables first.
    pub init_schema: bool,
    /// Engine configuration.
    pub migration: MigrationConfig,
    /// User customization: drop users with `about` set.
    pub exclude_users_with_about: bool,
    /// User customization: drop users created after a date.
    pub exclude_users_created_after: Option<NaiveDate>,
    /// Summary path.
    pub summary_path: PathBuf,
    /// Only print the plan.
    pub plan: bool,
    /// Report format.
    pub format: OutputFormat,
}

impl Args {
    /// Convert command-line arguments to a run configuration.
    pub fn into_config(self) -> CliConfig {
        let mut migration = MigrationConfig::new()
            .with_max_rename_tries(self.max_rename_tries)
            .with_dry_run(self.dry_run)
            .with_only(self.only)
            .with_exclude(self.exclude);
        if self.skip_deleted {
            migration = migration.with_migrate_deleted(false);
        }
        for entity in self.skip_deleted_for {
            migration = migration.with_entity_migrate_deleted(entity, false);
        }

        let source = match (self.source_csv, self.source_sqlite) {
            (Some(dir), _) => Some(SourceKind::Csv(dir)),
            (None, Some(path)) => Some(SourceKind::Sqlite(path)),
            (None, None) => None,
        };
        let target = match (self.target_sqlite, self.target_postgres) {
            (Some(path), _) => Some(TargetKind::Sqlite(path)),
            (None, Some(url)) => Some(TargetKind::Postgres(url)),
            (None, None) => None,
        };

        CliConfig {
            source,
            target,
            init_schema: self.init_schema,
            migration,
            exclude_users_with_about: self.exclude_users_with_about,
            exclude_users_created_after: self.exclude_users_created_after,
            summary_path: self.summary,
            plan: self.plan,
            format: self.format,
        }
    }
}

impl CliConfig {
    /// The CKAN catalog with the requested user customizations.
    pub fn catalog(&self) -> Vec<EntityDescriptor> {
        let mut catalog = ckan::catalog();
        if self.exclude_users_with_about {
            ckan::add_filter(&mut catalog, "users", ckan::exclude_users_with_about());
        }
        if let Some(cutoff) = self.exclude_users_created_after {
            ckan::add_filter(&mut catalog, "users", ckan::exclude_created_after(cutoff));
        }
        catalog
    }

    /// Open the legacy rows.
    pub fn open_source(&self) -> Result<Box<dyn RowSource>, CliError> {
        match &self.source {
            Some(SourceKind::Csv(dir)) => Ok(Box::new(CsvSnapshot::new(dir))),
            Some(SourceKind::Sqlite(path)) => Ok(Box::new(SqliteSource::open(path)?)),
            None => Err(CliError::MissingSource),
        }
    }

    /// Open the target store, creating its tables when asked to.
    pub fn open_sink(&self) -> Result<Box<dyn Sink>, CliError> {
        match &self.target {
            Some(TargetKind::Sqlite(path)) => {
                let sink = SqliteSink::open(path)?;
                if self.init_schema {
                    sink.init_schema()?;
                }
                Ok(Box::new(sink))
            }
            Some(TargetKind::Postgres(url)) => open_postgres(url, self.init_schema),
            None => Err(CliError::MissingTarget),
        }
    }
}

#[cfg(feature = "postgres")]
fn open_postgres(url: &str, init_schema: bool) -> Result<Box<dyn Sink>, CliError> {
    let mut sink = ckan_migrate_core::PgSink::connect(url)?;
    if init_schema {
        sink.init_schema()?;
    }
    Ok(Box::new(sink))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(_url: &str, _init_schema: bool) -> Result<Box<dyn Sink>, CliError> {
    Err(CliError::PostgresUnavailable)
}
