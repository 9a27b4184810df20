//! Error types for execution contexts, table proxies and data sources.

use std::path::PathBuf;

use thiserror::Error;

use super::value::Params;

/// Result type for all operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening sources or running statements.
#[derive(Error, Debug)]
pub enum Error {
    /// The data source could not be opened (missing file, bad directory, permissions).
    #[error("data source unavailable at '{path}': {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A statement failed inside the engine.
    #[error("query failed: {statement} (params: {params}): {source}")]
    Query {
        statement: String,
        params: Params,
        #[source]
        source: rusqlite::Error,
    },

    /// A named field does not match any declared column of the table.
    #[error("unknown column '{column}' for table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// No table with this name was registered on the schema.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// A positional insert supplied the wrong number of values.
    #[error("table '{table}' expects {expected} values, got {found}")]
    ColumnCount {
        table: String,
        expected: String,
        found: usize,
    },

    /// A record lacks a value for one of the table's identifier columns.
    #[error("record for table '{table}' has no value for id column '{column}'")]
    MissingId { table: String, column: String },

    /// The context was already closed.
    #[error("execution context is closed")]
    ContextClosed,

    /// A setup script file could not be read.
    #[error("failed to read script '{path}': {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A row value could not be converted to the requested type.
    #[error("column '{column}': expected {expected}, found {found}")]
    Conversion {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl Error {
    pub(crate) fn source_unavailable(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            source: source.into(),
        }
    }

    /// The engine error behind a failed statement, if any.
    pub fn sqlite_error(&self) -> Option<&rusqlite::Error> {
        match self {
            Self::Query { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether the failure was a constraint violation (UNIQUE, NOT NULL, CHECK, ...).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.sqlite_error(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
