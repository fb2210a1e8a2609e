//! Entity importer: fetched rows of one entity type into the target store.
//!
//! Each row moves through transform, parent validation, natural-key
//! resolution and the upsert, or stops at the first gate that rejects it.
//! Nothing below a fatal store error is raised to the caller; every other
//! outcome lands in the [`ImportReport`].

use std::collections::HashMap;

use tracing::{debug, error, info, instrument, warn};

use crate::descriptor::{EntityDescriptor, NaturalKey, OnExisting};
use crate::error::Result;
use crate::report::{ImportReport, SkipReason, WriteOutcome};
use crate::resolver::{composite_key, CollisionResolver};
use crate::sink::{Sink, Statement};
use crate::transform::Transformed;
use crate::validity::{RunContext, ValiditySet};
use crate::value::{Row, Value};

/// Natural keys taken in the target, with the row that holds each.
///
/// A row is never renamed away from a name it already holds, which keeps
/// reruns over the same input stable.
#[derive(Debug, Default)]
pub struct NamesInUse {
    owners: HashMap<String, Option<String>>,
    held: HashMap<String, String>,
}

impl NamesInUse {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the names already present in the target.
    pub fn seed<S: Sink + ?Sized>(
        sink: &mut S,
        descriptor: &EntityDescriptor,
        natural: &NaturalKey,
    ) -> Result<Self> {
        let mut columns = descriptor.key.clone();
        for column in std::iter::once(&natural.field).chain(&natural.scope) {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        let mut names = Self::new();
        for row in sink.fetch(&Statement::select(&descriptor.table, &columns))? {
            if let Some(name) = row.get(&natural.field).key_string() {
                let key = composite_key(&name, &scope_values(&row, natural));
                names.claim(key, row.key_of(&descriptor.key));
            }
        }
        Ok(names)
    }

    /// Whether `key` is held by a row other than `owner`.
    pub fn is_taken(&self, key: &str, owner: Option<&str>) -> bool {
        match self.owners.get(key) {
            Some(holder) => owner.is_none() || holder.as_deref() != owner,
            None => false,
        }
    }

    /// Record `key` as held by `owner`, releasing the owner's previous key.
    pub fn claim(&mut self, key: String, owner: Option<String>) {
        if let Some(owner) = &owner {
            if let Some(previous) = self.held.insert(owner.clone(), key.clone()) {
                if previous != key && self.owners.get(&previous) == Some(&Some(owner.clone())) {
                    self.owners.remove(&previous);
                }
            }
        }
        self.owners.insert(key, owner);
    }

    /// Number of names held.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Check if no names are held.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

fn scope_values(row: &Row, natural: &NaturalKey) -> Vec<Option<String>> {
    natural
        .scope
        .iter()
        .map(|field| row.get(field).key_string())
        .collect()
}

/// Imports the rows of one entity type.
#[derive(Debug, Clone)]
pub struct EntityImporter<'a> {
    descriptor: &'a EntityDescriptor,
    resolver: CollisionResolver,
    migrate_deleted: bool,
    dry_run: bool,
}

impl<'a> EntityImporter<'a> {
    /// Create an importer with the entity's own defaults.
    pub fn new(descriptor: &'a EntityDescriptor) -> Self {
        Self {
            descriptor,
            resolver: CollisionResolver::default(),
            migrate_deleted: descriptor.migrate_deleted_default(),
            dry_run: false,
        }
    }

    /// Set the collision resolver.
    pub fn with_resolver(mut self, resolver: CollisionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set whether soft-deleted rows are migrated.
    pub fn with_migrate_deleted(mut self, migrate: bool) -> Self {
        self.migrate_deleted = migrate;
        self
    }

    /// Roll back instead of committing.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Descriptor being imported.
    pub fn descriptor(&self) -> &EntityDescriptor {
        self.descriptor
    }

    /// Import `rows` in order and commit the entity's unit of work.
    ///
    /// Returns an error only when the sink itself fails (seeding the names in
    /// use, managing savepoints, or a write failing with a fatal error).
    #[instrument(skip_all, fields(entity = %self.descriptor.name))]
    pub fn import<S: Sink + ?Sized>(
        &self,
        rows: &[Row],
        sink: &mut S,
        context: &RunContext,
    ) -> Result<ImportReport> {
        let entity = self.descriptor;
        let mut report = ImportReport::new(&entity.name);
        if entity.has_single_key() {
            report.valid_ids = Some(ValiditySet::new());
        }

        let mut names = match &entity.natural_key {
            Some(natural) => Some(NamesInUse::seed(sink, entity, natural)?),
            None => None,
        };
        if let Some(names) = &names {
            debug!(names = names.len(), "names in use seeded");
        }

        for source_row in rows {
            report.record_seen();
            self.import_row(source_row, sink, context, names.as_mut(), &mut report)?;
        }

        self.finish(sink, &mut report)?;

        info!(
            total = report.total_rows,
            migrated = report.migrated_rows,
            inserted = report.inserted_rows,
            updated = report.updated_rows,
            unchanged = report.unchanged_rows,
            skipped = report.skipped_rows,
            renamed = report.renamed_rows,
            "entity imported"
        );
        Ok(report)
    }

    fn import_row<S: Sink + ?Sized>(
        &self,
        source_row: &Row,
        sink: &mut S,
        context: &RunContext,
        names: Option<&mut NamesInUse>,
        report: &mut ImportReport,
    ) -> Result<()> {
        let entity = self.descriptor;

        let mut row = match entity.transform(source_row, self.migrate_deleted) {
            Transformed::Row(row) => row,
            Transformed::Skip(reason) => {
                debug!(key = ?source_row.key_of(&entity.key), %reason, "row skipped");
                report.record_skip(reason);
                return Ok(());
            }
        };

        if let Err(rejection) = context.check(entity, &row) {
            warn!(%rejection, "parent reference rejected");
            report.errors.push(rejection.to_string());
            report.record_skip(SkipReason::MissingParent);
            return Ok(());
        }

        let row_key = row.key_of(&entity.key);
        let label = row_key.as_deref().unwrap_or("<no key>").to_string();

        let mut claimed = None;
        let mut renamed = false;
        if let (Some(natural), Some(names)) = (&entity.natural_key, names.as_deref()) {
            if let Some(candidate) = row.get(&natural.field).key_string() {
                let scope = scope_values(&row, natural);
                let seed = row_key.clone().unwrap_or_else(|| candidate.clone());
                let resolved = self.resolver.resolve(
                    &candidate,
                    |name| names.is_taken(&composite_key(name, &scope), row_key.as_deref()),
                    &seed,
                    natural.style,
                );
                if resolved != candidate {
                    warn!(key = %label, from = %candidate, to = %resolved, "natural key renamed");
                    report.warnings.push(format!(
                        "{} {}: {} '{}' already in use, renamed to '{}'",
                        entity.name, label, natural.field, candidate, resolved
                    ));
                    row.set(natural.field.clone(), Value::from(resolved.as_str()));
                    renamed = true;
                }
                claimed = Some(composite_key(&resolved, &scope));
            }
        }

        let outcome = match self.upsert(sink, &row)? {
            Ok(outcome) => outcome,
            Err(message) => {
                self.write_failed(report, &label, message);
                return Ok(());
            }
        };

        debug!(key = %label, ?outcome, "row written");
        report.record_written(outcome);
        if renamed {
            report.renamed_rows += 1;
        }
        if let (Some(ids), Some(key)) = (report.valid_ids.as_mut(), row_key.clone()) {
            ids.insert(key);
        }
        if let (Some(names), Some(claimed)) = (names, claimed) {
            names.claim(claimed, row_key);
        }
        Ok(())
    }

    /// Existence check and write inside one row savepoint. The outer result
    /// carries fatal sink errors, the inner one a rejected statement.
    fn upsert<S: Sink + ?Sized>(
        &self,
        sink: &mut S,
        row: &Row,
    ) -> Result<std::result::Result<WriteOutcome, String>> {
        sink.savepoint()?;
        match self.write(sink, row) {
            Ok(outcome) => {
                sink.release_savepoint()?;
                Ok(Ok(outcome))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                sink.rollback_to_savepoint()?;
                Ok(Err(e.to_string()))
            }
        }
    }

    fn write<S: Sink + ?Sized>(&self, sink: &mut S, row: &Row) -> Result<WriteOutcome> {
        let entity = self.descriptor;
        let key_values: Vec<(String, Value)> = entity
            .key
            .iter()
            .map(|field| (field.clone(), row.get(field).clone()))
            .collect();

        match (sink.exists(&entity.table, &key_values)?, entity.on_existing) {
            (true, OnExisting::Keep) => Ok(WriteOutcome::Unchanged),
            (true, OnExisting::Update) => {
                let fields = entity.field_names();
                sink.execute(&Statement::update(&entity.table, &fields, &entity.key, row))?;
                Ok(WriteOutcome::Updated)
            }
            (false, _) => {
                sink.execute(&Statement::insert(&entity.table, &entity.field_names(), row))?;
                Ok(WriteOutcome::Inserted)
            }
        }
    }

    fn write_failed(&self, report: &mut ImportReport, label: &str, message: String) {
        error!(key = %label, error = %message, "row write failed");
        report
            .errors
            .push(format!("{} {}: {}", self.descriptor.name, label, message));
        report.record_skip(SkipReason::WriteFailed);
    }

    fn finish<S: Sink + ?Sized>(&self, sink: &mut S, report: &mut ImportReport) -> Result<()> {
        if self.dry_run {
            sink.rollback()?;
            debug!("dry run, unit of work rolled back");
            return Ok(());
        }

        match sink.commit() {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!(error = %e, "commit failed");
                report
                    .errors
                    .push(format!("{}: commit failed: {}", self.descriptor.name, e));
                report.revoke_migrated(SkipReason::CommitFailed);
                if let Err(e) = sink.rollback() {
                    warn!(error = %e, "rollback after failed commit");
                }
                Ok(())
            }
        }
    }
}
