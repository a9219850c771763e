//! Error types for the fingerprint history.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or appending fingerprint records.
///
/// Read-side errors never block processing: callers asking "is this new?"
/// treat an unreadable history as "yes".
#[derive(Error, Debug)]
pub enum StoreError {
    /// The history file could not be opened, created or written.
    #[error("History file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The CSV reader or writer failed.
    #[error("History CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A stored line does not have the `subject,digest,timestamp` shape.
    #[error("Malformed history record at line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    /// Failed to open or create the database file.
    #[error("Failed to open history database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a schema migration.
    #[error("History database migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("History query failed: {0}")]
    Query(String),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("History schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StoreError {
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
