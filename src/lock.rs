//! Single-instance guard. Two overlapping runs against the same history file
//! would interleave appends and race on the staging directory, so a run holds
//! an exclusive advisory lock on `<history file>.lock` for its whole duration.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to create lock file {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Another reportsync run is using this history (lock: {0})")]
    Held(PathBuf),

    #[error("Lock task failed: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}

/// Held for as long as the value lives. Dropping it closes the file and
/// releases the lock.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn lock_path_for(history_file: &Path) -> PathBuf {
    let mut name = history_file
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("history"));
    name.push(".lock");
    history_file.with_file_name(name)
}

/// Take the run lock next to `history_file`, failing immediately if another
/// process holds it.
pub async fn acquire(history_file: &Path) -> Result<RunLock, LockError> {
    let lock_path = lock_path_for(history_file);
    let file = tokio::task::spawn_blocking({
        let lock_path = lock_path.clone();
        move || {
            if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| LockError::Create {
                    path: lock_path.clone(),
                    source: e,
                })?;
            }
            let file = File::create(&lock_path).map_err(|e| LockError::Create {
                path: lock_path.clone(),
                source: e,
            })?;
            file.try_lock_exclusive()
                .map_err(|_| LockError::Held(lock_path.clone()))?;
            Ok::<File, LockError>(file)
        }
    })
    .await??;

    tracing::debug!(path = %lock_path.display(), "Acquired run lock");
    Ok(RunLock {
        _file: file,
        path: lock_path,
    })
}
