//! Core error types.
//!
//! Only conditions that stop a run surface as [`Error`]. Row-level problems
//! (skips, rejected references, failed writes) are recorded in the
//! [`ImportReport`](crate::report::ImportReport) of the entity being imported.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Migration engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// SQLite error from a source or target store.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error from the target store.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Tabular snapshot could not be parsed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A store could not be reached at all.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rows for an entity type could not be read from the source.
    #[error("cannot read source rows for {entity}: {reason}")]
    Source {
        /// Entity whose rows were requested.
        entity: String,
        /// Underlying reason.
        reason: String,
    },

    /// The target store rejected a statement.
    #[error("statement failed: {0}")]
    Statement(String),

    /// Entity dependencies form a cycle.
    #[error("dependency cycle between entity types: {}", .entities.join(", "))]
    DependencyCycle {
        /// Entities that could not be ordered.
        entities: Vec<String>,
    },

    /// Unknown entity type requested.
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the store itself is unusable, as opposed to a
    /// single statement being rejected.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Io(_) => true,
            #[cfg(feature = "postgres")]
            Error::Postgres(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Source {
            entity: "packages".to_string(),
            reason: "file truncated".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot read source rows for packages: file truncated"
        );

        let err = Error::DependencyCycle {
            entities: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().ends_with("a, b"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Connection("refused".into()).is_fatal());
        assert!(!Error::Statement("unique violation".into()).is_fatal());
        assert!(!Error::Sqlite(rusqlite::Error::QueryReturnedNoRows).is_fatal());
        assert!(Error::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_fatal());
    }
}
