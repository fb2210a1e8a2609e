//! Entity descriptors.
//!
//! One [`EntityDescriptor`] per migrated entity type: what the target row looks
//! like, how it is keyed, which parents it references and which of its fields
//! must be unique in the revised schema.

use crate::value::{Row, Value};
use std::fmt;
use std::sync::Arc;

/// Where a target field gets its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    /// Copy the source field of the same or another name.
    Copy(String),
    /// Copy a source field, using a literal when it is null or absent.
    CopyOr(String, Value),
    /// Copy a source field, falling back to another source field.
    CopyOrField(String, String),
    /// Literal value, ignoring the source row.
    Const(Value),
}

/// A target field and its value source.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Target field name.
    pub name: String,
    /// Value source.
    pub source: FieldSource,
}

impl FieldDef {
    /// Copy the source field of the same name.
    pub fn copy(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: FieldSource::Copy(name.clone()),
            name,
        }
    }

    /// Copy a differently named source field.
    pub fn renamed(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: FieldSource::Copy(from.into()),
        }
    }

    /// Copy the source field of the same name with a literal default.
    pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        Self {
            source: FieldSource::CopyOr(name.clone(), default.into()),
            name,
        }
    }

    /// Copy the source field of the same name, falling back to another field.
    pub fn with_fallback(name: impl Into<String>, fallback: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: FieldSource::CopyOrField(name.clone(), fallback.into()),
            name,
        }
    }

    /// Field that is new in the target schema and always gets a literal.
    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            source: FieldSource::Const(value.into()),
        }
    }

    /// Resolve this field's value from a source row.
    pub fn resolve(&self, row: &Row) -> Value {
        match &self.source {
            FieldSource::Copy(src) => row.get(src).clone(),
            FieldSource::CopyOr(src, default) => match row.get(src) {
                Value::Null => default.clone(),
                v => v.clone(),
            },
            FieldSource::CopyOrField(src, fallback) => match row.get(src) {
                Value::Null => row.get(fallback).clone(),
                v => v.clone(),
            },
            FieldSource::Const(v) => v.clone(),
        }
    }
}

/// Reference from a foreign-key field to a parent entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRef {
    /// Parent entity name.
    pub entity: String,
    /// Foreign-key field on the target row.
    pub field: String,
    /// Only rows whose discriminator field equals the given text reference
    /// this parent (polymorphic references).
    pub only_when: Option<(String, String)>,
}

impl ParentRef {
    /// Create a parent reference.
    pub fn new(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            only_when: None,
        }
    }

    /// Scope the reference to rows where `field == value`.
    pub fn only_when(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.only_when = Some((field.into(), value.into()));
        self
    }

    /// Whether this reference applies to the given row.
    pub fn applies_to(&self, row: &Row) -> bool {
        match &self.only_when {
            Some((field, value)) => row.get_str(field) == Some(value.as_str()),
            None => true,
        }
    }
}

/// How a renamed key is spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStyle {
    /// Suffix appended to the key.
    Name,
    /// Suffix inserted before the `@` of an address.
    Email,
}

/// Field subject to a uniqueness constraint in the target schema.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalKey {
    /// Unique field.
    pub field: String,
    /// Fields partitioning the uniqueness domain, empty for global uniqueness.
    pub scope: Vec<String>,
    /// Rename spelling.
    pub style: KeyStyle,
}

impl NaturalKey {
    /// Globally unique name-like field.
    pub fn name(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            scope: Vec::new(),
            style: KeyStyle::Name,
        }
    }

    /// Globally unique email field.
    pub fn email(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            scope: Vec::new(),
            style: KeyStyle::Email,
        }
    }

    /// Partition uniqueness by the given field.
    pub fn scoped_by(mut self, field: impl Into<String>) -> Self {
        self.scope.push(field.into());
        self
    }
}

/// Soft-delete marker of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftDelete {
    /// Status field.
    pub state_field: String,
    /// Status value marking a row as deleted.
    pub deleted_value: String,
    /// Whether soft-deleted rows are migrated unless the run overrides it.
    pub migrate_deleted: bool,
}

/// What to do with a row whose key already exists in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnExisting {
    /// Overwrite all fields.
    #[default]
    Update,
    /// Leave the existing row alone.
    Keep,
}

/// Customization rule excluding source rows from the migration.
#[derive(Clone)]
pub struct RowFilter {
    /// Rule name, used in logs.
    pub name: String,
    excludes: Arc<dyn Fn(&Row) -> bool + Send + Sync>,
}

impl RowFilter {
    /// Create a rule; `excludes` returns true for rows that must not migrate.
    pub fn new(
        name: impl Into<String>,
        excludes: impl Fn(&Row) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            excludes: Arc::new(excludes),
        }
    }

    /// Whether the rule excludes this row.
    pub fn excludes(&self, row: &Row) -> bool {
        (self.excludes)(row)
    }
}

impl fmt::Debug for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowFilter").field("name", &self.name).finish()
    }
}

/// Static description of one migrated entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    /// Entity name, unique within a catalog.
    pub name: String,
    /// Table name in both schemas.
    pub table: String,
    /// Ordered target fields.
    pub fields: Vec<FieldDef>,
    /// Upsert key fields (one for a surrogate key, several for composites).
    pub key: Vec<String>,
    /// Parent references checked against validity sets.
    pub parents: Vec<ParentRef>,
    /// Ordering-only dependencies.
    pub depends_on: Vec<String>,
    /// Unique natural key, if any.
    pub natural_key: Option<NaturalKey>,
    /// Soft-delete marker, if the entity has one.
    pub soft_delete: Option<SoftDelete>,
    /// Behavior when the key already exists in the target.
    pub on_existing: OnExisting,
    /// Columns ordering live source reads.
    pub source_order: Vec<String>,
    /// Customization rules.
    pub filters: Vec<RowFilter>,
}

impl EntityDescriptor {
    /// Create a descriptor keyed by `id`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
            key: vec!["id".to_string()],
            parents: Vec::new(),
            depends_on: Vec::new(),
            natural_key: None,
            soft_delete: None,
            on_existing: OnExisting::Update,
            source_order: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add several fields copied verbatim.
    pub fn with_copied(mut self, names: &[&str]) -> Self {
        self.fields.extend(names.iter().map(|n| FieldDef::copy(*n)));
        self
    }

    /// Set the upsert key.
    pub fn with_key(mut self, key: &[&str]) -> Self {
        self.key = key.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Add a parent reference.
    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parents.push(parent);
        self
    }

    /// Add an ordering-only dependency.
    pub fn after(mut self, entity: impl Into<String>) -> Self {
        self.depends_on.push(entity.into());
        self
    }

    /// Declare the unique natural key.
    pub fn with_natural_key(mut self, key: NaturalKey) -> Self {
        self.natural_key = Some(key);
        self
    }

    /// Mark rows with `state = 'deleted'` as soft-deleted.
    pub fn with_soft_delete(mut self, migrate_deleted: bool) -> Self {
        self.soft_delete = Some(SoftDelete {
            state_field: "state".to_string(),
            deleted_value: "deleted".to_string(),
            migrate_deleted,
        });
        self
    }

    /// Keep rows that already exist instead of updating them.
    pub fn keep_existing(mut self) -> Self {
        self.on_existing = OnExisting::Keep;
        self
    }

    /// Order live source reads by the given columns.
    pub fn ordered_by(mut self, columns: &[&str]) -> Self {
        self.source_order = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add a customization rule.
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Target field names in order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Whether the entity is keyed by a single field.
    pub fn has_single_key(&self) -> bool {
        self.key.len() == 1
    }

    /// Entities this one must be imported after.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.parents
            .iter()
            .map(|p| p.entity.as_str())
            .chain(self.depends_on.iter().map(String::as_str))
            .filter(move |e| *e != self.name)
    }

    /// Default for migrating soft-deleted rows.
    pub fn migrate_deleted_default(&self) -> bool {
        self.soft_delete
            .as_ref()
            .map(|s| s.migrate_deleted)
            .unwrap_or(true)
    }
}
