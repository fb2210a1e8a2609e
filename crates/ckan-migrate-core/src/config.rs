//! Migration run configuration.

use crate::descriptor::EntityDescriptor;
use crate::error::{Error, Result};
use crate::resolver::{CollisionResolver, DEFAULT_MAX_TRIES};
use std::collections::BTreeMap;

/// Options of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Run-wide override for migrating soft-deleted rows. None keeps each
    /// entity's own default.
    pub migrate_deleted: Option<bool>,

    /// Per-entity overrides, taking precedence over the run-wide one.
    pub entity_migrate_deleted: BTreeMap<String, bool>,

    /// Deterministic rename candidates tried before the random fallback.
    pub max_rename_tries: usize,

    /// Roll back every entity's writes instead of committing them.
    pub dry_run: bool,

    /// Restrict the run to these entities. Empty selects all.
    pub only: Vec<String>,

    /// Entities left out of the run.
    pub exclude: Vec<String>,
}

impl MigrationConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            migrate_deleted: None,
            entity_migrate_deleted: BTreeMap::new(),
            max_rename_tries: DEFAULT_MAX_TRIES,
            dry_run: false,
            only: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Override soft-deleted row handling for every entity.
    pub fn with_migrate_deleted(mut self, migrate: bool) -> Self {
        self.migrate_deleted = Some(migrate);
        self
    }

    /// Override soft-deleted row handling for one entity.
    pub fn with_entity_migrate_deleted(mut self, entity: impl Into<String>, migrate: bool) -> Self {
        self.entity_migrate_deleted.insert(entity.into(), migrate);
        self
    }

    /// Set the rename retry bound.
    pub fn with_max_rename_tries(mut self, tries: usize) -> Self {
        self.max_rename_tries = tries.max(1);
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run only the given entities.
    pub fn with_only<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Leave the given entities out.
    pub fn with_exclude<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Whether soft-deleted rows of an entity are migrated.
    pub fn migrate_deleted_for(&self, entity: &EntityDescriptor) -> bool {
        self.entity_migrate_deleted
            .get(&entity.name)
            .copied()
            .or(self.migrate_deleted)
            .unwrap_or_else(|| entity.migrate_deleted_default())
    }

    /// Whether an entity takes part in the run.
    pub fn selects(&self, entity: &str) -> bool {
        (self.only.is_empty() || self.only.iter().any(|e| e == entity))
            && !self.exclude.iter().any(|e| e == entity)
    }

    /// Collision resolver for this run.
    pub fn resolver(&self) -> CollisionResolver {
        CollisionResolver::new(self.max_rename_tries)
    }

    /// Check that every entity named by the configuration exists.
    pub fn validate(&self, catalog: &[EntityDescriptor]) -> Result<()> {
        let named = self
            .only
            .iter()
            .chain(&self.exclude)
            .chain(self.entity_migrate_deleted.keys());
        for name in named {
            if !catalog.iter().any(|e| &e.name == name) {
                return Err(Error::UnknownEntity(name.clone()));
            }
        }
        Ok(())
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new()
    }
}
