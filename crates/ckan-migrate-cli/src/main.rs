//! CKAN Migrate - command-line migration of a legacy CKAN store.

mod config;
mod formatter;
mod runner;

use std::fs::File;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ckan_migrate_core::MigrationDriver;
use config::Args;
use formatter::create_formatter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let log_file = match &args.log_file {
        Some(path) => Some(Arc::new(File::create(path)?)),
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ckan_migrate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(log_file.map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
        }))
        .init();

    let config = args.into_config();
    let formatter = create_formatter(config.format);

    if config.plan {
        let driver = MigrationDriver::new(config.catalog()).with_config(config.migration.clone());
        let order = driver.plan_names()?;
        println!("{}", formatter.format_plan(&order));
        return Ok(());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        source = ?config.source,
        target = ?config.target,
        dry_run = config.migration.dry_run,
        "configuration loaded"
    );

    let summary = runner::execute(&config)?;

    println!("{}", formatter.format_summary(&summary));

    if summary.is_aborted() {
        tracing::error!(status = %summary.status, "migration did not complete");
        std::process::exit(1);
    }

    Ok(())
}
