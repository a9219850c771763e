use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;

/// A transfer-stage failure for one report. Never fatal to the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to list remote directory {dir}: {source}")]
    List { dir: String, source: RemoteError },

    #[error("Failed to stat {path}: {source}")]
    Stat { path: String, source: RemoteError },

    #[error("Failed to download {filename}: {source}")]
    Transfer {
        filename: String,
        source: RemoteError,
    },

    #[error("Failed to prepare staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FetchError {
    /// Remote file name the failure concerns, when one was selected.
    pub fn filename(&self) -> Option<&str> {
        match self {
            FetchError::Transfer { filename, .. } => Some(filename),
            FetchError::Stat { path, .. } => Some(path.rsplit('/').next().unwrap_or(path)),
            FetchError::List { .. } | FetchError::Staging { .. } => None,
        }
    }
}
