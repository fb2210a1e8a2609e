//! CKAN Migrate Core - dependency-ordered migration of a legacy CKAN store.
//!
//! Rows are read per entity type from a [`RowSource`], transformed by an
//! [`EntityDescriptor`], checked against the validity sets of their parents,
//! given collision-free natural keys and upserted into a [`Sink`]. The
//! [`MigrationDriver`] runs the entity types in dependency order and collects
//! a [`RunSummary`].

pub mod ckan;
pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod importer;
pub mod report;
pub mod resolver;
pub mod sink;
pub mod source;
pub mod transform;
pub mod validity;
pub mod value;

pub use config::MigrationConfig;
pub use descriptor::{
    EntityDescriptor, FieldDef, FieldSource, KeyStyle, NaturalKey, OnExisting, ParentRef,
    RowFilter, SoftDelete,
};
pub use driver::MigrationDriver;
pub use error::{Error, Result};
pub use importer::{EntityImporter, NamesInUse};
pub use report::{ImportReport, RunStatus, RunSummary, RunTotals, SkipReason, WriteOutcome};
pub use resolver::{CollisionResolver, DEFAULT_MAX_TRIES};
pub use transform::Transformed;
pub use validity::{Rejection, RunContext, ValiditySet};
pub use value::{Row, Value};

// Store adapters
pub use sink::{Dialect, MemorySink, Sink, SqliteSink, Statement, TARGET_SCHEMA};
#[cfg(feature = "postgres")]
pub use sink::PgSink;
pub use source::{CsvSnapshot, MemorySource, RowSource, SqliteSource};
