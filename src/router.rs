//! Dedup router: decides where a staged file ends up.
//!
//! ```text
//! Staged ──seen before──────────────────────────► Discarded (NoUpdate)
//!   │
//!   └─new──► PendingMove(dir) ──name taken──────► Discarded (AlreadyExists)
//!                   │
//!                   └────────────────────────────► Moved (Updated)
//! ```
//!
//! `dir` is the report's destination, or the overflow directory when the
//! destination does not exist. Every terminal state appends one history
//! record keyed by the staged path.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::history::{FingerprintStore, StoreError};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Staged path {0} has no file name")]
    NoFileName(PathBuf),

    #[error("Failed to create overflow directory {path}: {source}")]
    Overflow {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RouteState {
    Staged,
    PendingMove(PathBuf),
}

/// Terminal state of a routed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Content was new and now lives at `destination`.
    Updated { destination: PathBuf },
    /// Content was already recorded for this report; staged copy deleted.
    NoUpdate,
    /// Content was new but `destination` already existed; staged copy deleted.
    AlreadyExists { destination: PathBuf },
}

#[derive(Debug)]
pub struct Routed {
    pub outcome: RouteOutcome,
    /// Set when the history append failed after the file was routed.
    pub history_error: Option<StoreError>,
}

pub struct DedupRouter<'a> {
    store: &'a dyn FingerprintStore,
    overflow_dir: &'a Path,
}

impl<'a> DedupRouter<'a> {
    pub fn new(store: &'a dyn FingerprintStore, overflow_dir: &'a Path) -> Self {
        Self {
            store,
            overflow_dir,
        }
    }

    /// Route `staged` (whose content hashes to `digest`) for `identifier`.
    ///
    /// On error the staged copy is removed and nothing is recorded.
    pub async fn route(
        &self,
        identifier: &str,
        staged: &Path,
        digest: &str,
        destination: &Path,
    ) -> Result<Routed, RouteError> {
        let file_name = staged
            .file_name()
            .ok_or_else(|| RouteError::NoFileName(staged.to_path_buf()))?
            .to_owned();

        let mut state = RouteState::Staged;
        let outcome = loop {
            state = match state {
                RouteState::Staged => {
                    if !self.store.is_new_content(identifier, digest).await {
                        discard(staged).await;
                        break RouteOutcome::NoUpdate;
                    }
                    match self.resolve_dir(identifier, destination).await {
                        Ok(dir) => RouteState::PendingMove(dir),
                        Err(e) => {
                            discard(staged).await;
                            return Err(e);
                        }
                    }
                }
                RouteState::PendingMove(dir) => {
                    let target = dir.join(&file_name);
                    if path_exists(&target).await {
                        discard(staged).await;
                        break RouteOutcome::AlreadyExists {
                            destination: target,
                        };
                    }
                    if let Err(e) = move_file(staged, &target).await {
                        discard(staged).await;
                        return Err(RouteError::Move {
                            from: staged.to_path_buf(),
                            to: target,
                            source: e,
                        });
                    }
                    break RouteOutcome::Updated {
                        destination: target,
                    };
                }
            };
        };

        tracing::debug!(report = identifier, ?outcome, "Routed staged file");

        let subject = staged.to_string_lossy();
        let history_error = match self.store.append(&subject, digest).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(
                    report = identifier,
                    digest,
                    error = %e,
                    "Failed to record fingerprint"
                );
                Some(e)
            }
        };

        Ok(Routed {
            outcome,
            history_error,
        })
    }

    /// The destination if it is an existing directory, otherwise the overflow
    /// directory (created on demand).
    async fn resolve_dir(&self, identifier: &str, destination: &Path) -> Result<PathBuf, RouteError> {
        if tokio::fs::metadata(destination)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Ok(destination.to_path_buf());
        }
        tracing::warn!(
            report = identifier,
            destination = %destination.display(),
            overflow = %self.overflow_dir.display(),
            "Destination directory missing, using overflow directory"
        );
        tokio::fs::create_dir_all(self.overflow_dir)
            .await
            .map_err(|e| RouteError::Overflow {
                path: self.overflow_dir.to_path_buf(),
                source: e,
            })?;
        Ok(self.overflow_dir.to_path_buf())
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Remove a staged file. Failure is logged, not returned: the outcome has
/// already been decided.
async fn discard(staged: &Path) {
    if let Err(e) = tokio::fs::remove_file(staged).await {
        tracing::warn!(path = %staged.display(), error = %e, "Failed to delete staged file");
    }
}

/// Rename, falling back to copy-and-delete when the rename crosses
/// filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(error = %rename_err, "Rename failed, copying instead");
            copy_then_remove(from, to).await
        }
    }
}

/// Once the copy is complete the file has been delivered; a source that
/// cannot be removed is only worth a warning.
async fn copy_then_remove(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Err(e) = tokio::fs::copy(from, to).await {
        let _ = tokio::fs::remove_file(to).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::remove_file(from).await {
        tracing::warn!(
            path = %from.display(),
            error = %e,
            "Copied to destination but could not delete staged file"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::CsvHistory;

    struct Fixture {
        _root: tempfile::TempDir,
        staging: PathBuf,
        destination: PathBuf,
        overflow: PathBuf,
        store: CsvHistory,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("download");
        let destination = root.path().join("Transfer_1");
        let overflow = root.path().join("transfer");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::create_dir_all(&destination).unwrap();
        let store = CsvHistory::open(&root.path().join("checksum.txt")).unwrap();
        Fixture {
            _root: root,
            staging,
            destination,
            overflow,
            store,
        }
    }

    fn stage(f: &Fixture, name: &str, content: &[u8]) -> PathBuf {
        let p = f.staging.join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    #[tokio::test]
    async fn test_new_content_is_moved_and_recorded() {
        let f = fixture();
        let staged = stage(&f, "Report_1_2025.csv", b"rows");
        let router = DedupRouter::new(&f.store, &f.overflow);

        let routed = router
            .route("Report_1", &staged, "abc", &f.destination)
            .await
            .unwrap();

        let expected = f.destination.join("Report_1_2025.csv");
        assert_eq!(
            routed.outcome,
            RouteOutcome::Updated {
                destination: expected.clone()
            }
        );
        assert!(routed.history_error.is_none());
        assert!(!staged.exists());
        assert_eq!(std::fs::read(&expected).unwrap(), b"rows");

        let records = f.store.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, staged.to_string_lossy());
    }

    #[tokio::test]
    async fn test_seen_content_is_discarded_and_still_recorded() {
        let f = fixture();
        f.store
            .append(&f.staging.join("Report_1_2025.csv").to_string_lossy(), "abc")
            .await
            .unwrap();
        let staged = stage(&f, "Report_1_2025.csv", b"rows");
        let router = DedupRouter::new(&f.store, &f.overflow);

        let routed = router
            .route("Report_1", &staged, "abc", &f.destination)
            .await
            .unwrap();

        assert_eq!(routed.outcome, RouteOutcome::NoUpdate);
        assert!(!staged.exists());
        assert!(!f.destination.join("Report_1_2025.csv").exists());
        assert_eq!(f.store.records().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_target_is_not_overwritten() {
        let f = fixture();
        let target = f.destination.join("Report_1_2025.csv");
        std::fs::write(&target, b"already here").unwrap();
        let staged = stage(&f, "Report_1_2025.csv", b"rows");
        let router = DedupRouter::new(&f.store, &f.overflow);

        let routed = router
            .route("Report_1", &staged, "abc", &f.destination)
            .await
            .unwrap();

        assert_eq!(
            routed.outcome,
            RouteOutcome::AlreadyExists {
                destination: target.clone()
            }
        );
        assert!(!staged.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"already here");
        assert_eq!(f.store.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_destination_uses_overflow() {
        let f = fixture();
        let staged = stage(&f, "Report_2_2025.csv", b"rows");
        let missing = f.destination.with_file_name("Transfer_2");
        let router = DedupRouter::new(&f.store, &f.overflow);

        let routed = router
            .route("Report_2", &staged, "def", &missing)
            .await
            .unwrap();

        let expected = f.overflow.join("Report_2_2025.csv");
        assert_eq!(
            routed.outcome,
            RouteOutcome::Updated {
                destination: expected.clone()
            }
        );
        assert!(f.overflow.is_dir());
        assert!(!missing.exists());
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_destination_that_is_a_file_uses_overflow() {
        let f = fixture();
        let not_a_dir = f.destination.with_file_name("Transfer_3");
        std::fs::write(&not_a_dir, b"").unwrap();
        let staged = stage(&f, "Report_3.csv", b"rows");
        let router = DedupRouter::new(&f.store, &f.overflow);

        let routed = router
            .route("Report_3", &staged, "ghi", &not_a_dir)
            .await
            .unwrap();
        assert!(matches!(routed.outcome, RouteOutcome::Updated { .. }));
        assert!(f.overflow.join("Report_3.csv").exists());
    }

    #[tokio::test]
    async fn test_copy_fallback_failed_copy_leaves_no_target() {
        let f = fixture();
        let missing = f.staging.join("gone.csv");
        let target = f.destination.join("gone.csv");
        assert!(copy_then_remove(&missing, &target).await.is_err());
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_fallback_keeps_delivery_when_source_is_stuck() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        let staged = stage(&f, "Report_1.csv", b"rows");
        let target = f.destination.join("Report_1.csv");
        std::fs::set_permissions(&f.staging, std::fs::Permissions::from_mode(0o555)).unwrap();

        let result = copy_then_remove(&staged, &target).await;

        std::fs::set_permissions(&f.staging, std::fs::Permissions::from_mode(0o755)).unwrap();
        // Root ignores the directory mode, in which case the source is removed
        // as usual; either way the copy counts as a successful move.
        assert!(result.is_ok());
        assert_eq!(std::fs::read(&target).unwrap(), b"rows");
    }

    #[tokio::test]
    async fn test_unreadable_history_routes_as_new() {
        let f = fixture();
        std::fs::write(f.store.path(), "garbage\n").unwrap();
        let staged = stage(&f, "Report_1.csv", b"rows");
        let router = DedupRouter::new(&f.store, &f.overflow);

        let routed = router
            .route("Report_1", &staged, "abc", &f.destination)
            .await
            .unwrap();
        assert!(matches!(routed.outcome, RouteOutcome::Updated { .. }));
    }
}
