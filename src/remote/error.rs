use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by a remote filesystem capability.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("SSH authentication failed for user {0}")]
    AuthenticationFailed(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Remote path not found: {0}")]
    NotFound(String),

    #[error("Remote entry {0} has no modification time")]
    MissingMtime(String),

    #[error("Failed to write {path}: {source}")]
    Local {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Remote I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote session is closed")]
    Closed,

    #[error("Remote session lock poisoned")]
    Poisoned,

    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}
