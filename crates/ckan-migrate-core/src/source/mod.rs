//! Source row providers.
//!
//! A [`RowSource`] yields the rows of one entity type in the order the
//! migration should process them.

pub mod memory;
pub mod snapshot;
pub mod sqlite;

pub use memory::MemorySource;
pub use snapshot::CsvSnapshot;
pub use sqlite::SqliteSource;

use crate::descriptor::EntityDescriptor;
use crate::error::Result;
use crate::value::Row;

/// Ordered rows of the legacy store, per entity type.
pub trait RowSource {
    /// Read every row of the entity's table.
    ///
    /// An unreadable source is an error and stops the run; a table that is
    /// simply absent yields no rows.
    fn fetch(&mut self, entity: &EntityDescriptor) -> Result<Vec<Row>>;

    /// Notices about the last fetch that belong in the entity's report, such
    /// as a table missing from the legacy store. Draining.
    fn take_notices(&mut self) -> Vec<String> {
        Vec::new()
    }
}

impl<S: RowSource + ?Sized> RowSource for Box<S> {
    fn fetch(&mut self, entity: &EntityDescriptor) -> Result<Vec<Row>> {
        (**self).fetch(entity)
    }

    fn take_notices(&mut self) -> Vec<String> {
        (**self).take_notices()
    }
}
