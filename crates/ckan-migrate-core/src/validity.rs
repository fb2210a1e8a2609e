//! Validity sets: identifiers confirmed present in the target per entity type.
//!
//! The importer of an entity type owns and fills its set; once that import
//! finishes the set is published to the [`RunContext`] and only read from then
//! on.

use crate::descriptor::EntityDescriptor;
use crate::value::Row;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifiers of one entity type present in the target store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValiditySet(BTreeSet<String>);

impl ValiditySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identifier.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }

    /// Check membership.
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    /// Number of identifiers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove every identifier.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterate identifiers in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ValiditySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A row rejected because a foreign key does not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Entity of the rejected row.
    pub entity: String,
    /// Key of the rejected row.
    pub row_key: String,
    /// Foreign-key field.
    pub field: String,
    /// Missing parent identifier.
    pub missing: String,
    /// Parent entity type.
    pub parent: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ignored: {} '{}' does not exist in migrated {}",
            self.entity, self.row_key, self.field, self.missing, self.parent
        )
    }
}

/// Run-scoped store of published validity sets, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    sets: BTreeMap<String, ValiditySet>,
}

impl RunContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the validity set of an entity type.
    pub fn publish(&mut self, entity: impl Into<String>, set: ValiditySet) {
        self.sets.insert(entity.into(), set);
    }

    /// Builder-style publish.
    pub fn with(mut self, entity: impl Into<String>, set: ValiditySet) -> Self {
        self.publish(entity, set);
        self
    }

    /// Validity set of an entity type, if it was part of this run.
    pub fn get(&self, entity: &str) -> Option<&ValiditySet> {
        self.sets.get(entity)
    }

    /// Entity types with a published set.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    /// Check every parent reference of a transformed row.
    ///
    /// Null foreign keys, references scoped away by their discriminator and
    /// parents without a published set always pass.
    pub fn check(&self, descriptor: &EntityDescriptor, row: &Row) -> Result<(), Rejection> {
        for parent in &descriptor.parents {
            if !parent.applies_to(row) {
                continue;
            }
            let Some(fk) = row.get(&parent.field).key_string() else {
                continue;
            };
            let Some(valid) = self.get(&parent.entity) else {
                continue;
            };
            if !valid.contains(&fk) {
                return Err(Rejection {
                    entity: descriptor.name.clone(),
                    row_key: row
                        .key_of(&descriptor.key)
                        .unwrap_or_else(|| "<no key>".to_string()),
                    field: parent.field.clone(),
                    missing: fk,
                    parent: parent.entity.clone(),
                });
            }
        }
        Ok(())
    }
}
