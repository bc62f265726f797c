//! Error taxonomy for the index, the file store and the tag cache

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::tag::TagParseError;

/// Errors reported by index, cache and store operations
#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    /// A store could not be opened or created
    #[error("unable to open database {path:?}: {source}")]
    #[diagnostic(code(dicom_index::open_failure))]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The connection could not be closed (pending statements were not finalized)
    #[error("unable to close database {path:?}: {source}")]
    #[diagnostic(code(dicom_index::close_failure))]
    Close {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The instance lacks the attributes required to place it in the hierarchy
    #[error("dataset is missing required identifying attributes: {}", missing.join(", "))]
    #[diagnostic(
        code(dicom_index::missing_identity),
        help("an instance needs a patient name or ID, a study instance UID, a series instance UID and a SOP instance UID")
    )]
    MissingIdentity { missing: Vec<&'static str> },

    /// The dataset reader could not parse the source
    #[error("could not read dataset {path:?}: {reason}")]
    #[diagnostic(code(dicom_index::unreadable_source))]
    UnreadableSource { path: PathBuf, reason: String },

    /// Copying or saving the instance into the file store failed
    #[error("could not write {path:?}: {source}")]
    #[diagnostic(code(dicom_index::write_failure))]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An individual statement failed
    #[error("SQL failed: {source}\n  statement: {sql}")]
    #[diagnostic(code(dicom_index::statement_failure))]
    Statement {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// An in-memory dataset had no file location to be indexed under
    #[error("dataset has no source file and cannot be stored in this database")]
    #[diagnostic(
        code(dicom_index::no_storage_location),
        help("insert datasets into a file-backed database with file storage enabled")
    )]
    NoStorageLocation,

    #[error(transparent)]
    #[diagnostic(code(dicom_index::invalid_tag))]
    InvalidTag(#[from] TagParseError),

    #[error("configuration error in {path:?}: {message}")]
    #[diagnostic(code(dicom_index::config))]
    Config { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    #[diagnostic(code(dicom_index::io))]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Attach the failing statement to a driver error, logging it
pub(crate) trait StatementContext<T> {
    fn with_sql(self, sql: &str) -> Result<T>;
}

impl<T> StatementContext<T> for rusqlite::Result<T> {
    fn with_sql(self, sql: &str) -> Result<T> {
        self.map_err(|source| {
            tracing::error!(sql, error = %source, "SQL failed");
            IndexError::Statement {
                sql: sql.to_string(),
                source,
            }
        })
    }
}
