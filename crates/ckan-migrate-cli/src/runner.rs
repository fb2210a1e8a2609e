//! One migration run from a resolved configuration.

use ckan_migrate_core::{MigrationDriver, RowSource, RunSummary, Sink};

use crate::config::{CliConfig, CliError};

/// Open the stores, run the migration and archive the summary.
///
/// A store that cannot be opened yields an aborted summary naming it, so the
/// archive is written for every run that got past planning.
pub fn execute(config: &CliConfig) -> Result<RunSummary, CliError> {
    let driver = MigrationDriver::new(config.catalog()).with_config(config.migration.clone());
    let order = driver.plan_names()?;

    let summary = match open_stores(config) {
        Ok((mut source, mut sink)) => driver.run(&mut *source, &mut *sink)?,
        Err((store, e)) => {
            tracing::error!(store, error = %e, "cannot open store");
            let mut summary = RunSummary::start(order, config.migration.dry_run);
            summary.abort(store, e.to_string());
            summary
        }
    };

    summary.write_json(&config.summary_path)?;
    tracing::info!(path = %config.summary_path.display(), "summary written");
    Ok(summary)
}

type Stores = (Box<dyn RowSource>, Box<dyn Sink>);

fn open_stores(config: &CliConfig) -> Result<Stores, (&'static str, CliError)> {
    let source = config.open_source().map_err(|e| ("source", e))?;
    let sink = config.open_sink().map_err(|e| ("target", e))?;
    Ok((source, sink))
}
