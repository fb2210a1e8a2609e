//! Old-schema row to new-schema row.

use crate::descriptor::EntityDescriptor;
use crate::report::SkipReason;
use crate::value::Row;

/// Result of transforming a source row.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    /// Target row to write.
    Row(Row),
    /// Row is not migrated.
    Skip(SkipReason),
}

impl Transformed {
    /// Get the target row, if any.
    pub fn into_row(self) -> Option<Row> {
        match self {
            Transformed::Row(row) => Some(row),
            Transformed::Skip(_) => None,
        }
    }
}

impl EntityDescriptor {
    /// Transform a source row.
    ///
    /// Applies the soft-delete gate, then the customization rules, then the
    /// field map. Source fields without a target field are dropped.
    pub fn transform(&self, row: &Row, migrate_deleted: bool) -> Transformed {
        if let Some(soft_delete) = &self.soft_delete {
            if !migrate_deleted
                && row.get_str(&soft_delete.state_field) == Some(soft_delete.deleted_value.as_str())
            {
                return Transformed::Skip(SkipReason::SoftDeleted);
            }
        }

        if let Some(filter) = self.filters.iter().find(|f| f.excludes(row)) {
            tracing::debug!(entity = %self.name, rule = %filter.name, "row excluded");
            return Transformed::Skip(SkipReason::Excluded);
        }

        Transformed::Row(
            self.fields
                .iter()
                .map(|field| (field.name.clone(), field.resolve(row)))
                .collect(),
        )
    }
}
