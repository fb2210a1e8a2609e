//! Migration driver: runs entity importers in dependency order.

use std::collections::BTreeSet;

use tracing::{error, info, warn};

use crate::config::MigrationConfig;
use crate::descriptor::EntityDescriptor;
use crate::error::{Error, Result};
use crate::importer::EntityImporter;
use crate::report::RunSummary;
use crate::sink::Sink;
use crate::source::RowSource;
use crate::validity::RunContext;

/// Sequences the import of a catalog of entity types.
#[derive(Debug, Clone)]
pub struct MigrationDriver {
    catalog: Vec<EntityDescriptor>,
    config: MigrationConfig,
}

impl MigrationDriver {
    /// Create a driver over a catalog, in declaration order.
    pub fn new(catalog: Vec<EntityDescriptor>) -> Self {
        Self {
            catalog,
            config: MigrationConfig::default(),
        }
    }

    /// Set the run configuration.
    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Entity catalog.
    pub fn catalog(&self) -> &[EntityDescriptor] {
        &self.catalog
    }

    /// Run configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Selected entities in import order.
    ///
    /// Parents come before children; among entities whose dependencies are
    /// all satisfied the one declared first goes first. Dependencies on
    /// entities outside the selection do not constrain the order.
    pub fn plan(&self) -> Result<Vec<&EntityDescriptor>> {
        self.config.validate(&self.catalog)?;

        let mut seen = BTreeSet::new();
        for entity in &self.catalog {
            if !seen.insert(entity.name.as_str()) {
                return Err(Error::Config(format!(
                    "entity type {} declared twice",
                    entity.name
                )));
            }
        }

        let selected: Vec<&EntityDescriptor> = self
            .catalog
            .iter()
            .filter(|e| self.config.selects(&e.name))
            .collect();
        let names: BTreeSet<&str> = selected.iter().map(|e| e.name.as_str()).collect();

        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(selected.len());
        while order.len() < selected.len() {
            let next = selected.iter().find(|e| {
                !placed.contains(e.name.as_str())
                    && e.dependencies()
                        .all(|dep| !names.contains(dep) || placed.contains(dep))
            });
            match next {
                Some(entity) => {
                    placed.insert(entity.name.as_str());
                    order.push(*entity);
                }
                None => {
                    let entities = selected
                        .iter()
                        .filter(|e| !placed.contains(e.name.as_str()))
                        .map(|e| e.name.clone())
                        .collect();
                    return Err(Error::DependencyCycle { entities });
                }
            }
        }
        Ok(order)
    }

    /// Names of the selected entities in import order.
    pub fn plan_names(&self) -> Result<Vec<String>> {
        Ok(self.plan()?.into_iter().map(|e| e.name.clone()).collect())
    }

    /// Run the migration.
    ///
    /// Configuration problems are returned as errors before anything is read.
    /// Once the run has started it always yields a summary; a fatal source or
    /// sink failure stops it with status aborted and the reports completed so
    /// far.
    pub fn run<R, S>(&self, source: &mut R, sink: &mut S) -> Result<RunSummary>
    where
        R: RowSource + ?Sized,
        S: Sink + ?Sized,
    {
        let plan = self.plan()?;
        let mut summary = RunSummary::start(
            plan.iter().map(|e| e.name.clone()).collect(),
            self.config.dry_run,
        );
        let mut context = RunContext::new();
        let resolver = self.config.resolver();

        info!(
            entities = plan.len(),
            dry_run = self.config.dry_run,
            "migration started"
        );

        for entity in plan {
            let importer = EntityImporter::new(entity)
                .with_resolver(resolver)
                .with_migrate_deleted(self.config.migrate_deleted_for(entity))
                .with_dry_run(self.config.dry_run);

            let outcome = source
                .fetch(entity)
                .and_then(|rows| importer.import(&rows, sink, &context));

            match outcome {
                Ok(mut report) => {
                    report.warnings.extend(source.take_notices());
                    if let Some(ids) = &report.valid_ids {
                        context.publish(&entity.name, ids.clone());
                    }
                    summary.push(report);
                }
                Err(e) => {
                    error!(entity = %entity.name, error = %e, "migration aborted");
                    if let Err(rollback) = sink.rollback() {
                        warn!(error = %rollback, "rollback after abort failed");
                    }
                    summary.abort(&entity.name, e.to_string());
                    return Ok(summary);
                }
            }
        }

        summary.complete();
        let totals = summary.totals();
        info!(
            total = totals.total_rows,
            migrated = totals.migrated_rows,
            skipped = totals.skipped_rows,
            "migration complete"
        );
        Ok(summary)
    }
}
