//! Fetcher: pick the newest remote file whose name contains a report
//! identifier and copy it into the staging directory.

pub mod error;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::remote::{join_remote, RemoteFs};

pub use error::FetchError;

/// A remote entry that matched an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCandidate {
    pub name: String,
    pub mtime: DateTime<Utc>,
}

/// A downloaded file waiting for a dedup decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub remote_name: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(StagedFile),
    /// Nothing on the remote matched. A skip, not a failure.
    NotFound,
}

/// Pick the candidate with the latest modification time.
///
/// Comparison is strict, so on an exact tie the first candidate in iteration
/// order wins. Servers do not promise a listing order, which makes ties
/// non-deterministic across servers but stable for a fixed listing.
pub fn select_newest<I>(candidates: I) -> Option<RemoteCandidate>
where
    I: IntoIterator<Item = RemoteCandidate>,
{
    let mut newest: Option<RemoteCandidate> = None;
    for candidate in candidates {
        let is_newer = newest
            .as_ref()
            .is_none_or(|current| candidate.mtime > current.mtime);
        if is_newer {
            newest = Some(candidate);
        }
    }
    newest
}

/// List `remote_dir` and return the newest entry whose name contains
/// `identifier` (case-sensitive substring). Only matching entries are stat'ed.
pub async fn find_newest(
    remote: &dyn RemoteFs,
    identifier: &str,
    remote_dir: &str,
) -> Result<Option<RemoteCandidate>, FetchError> {
    let names = remote
        .list_dir(remote_dir)
        .await
        .map_err(|e| FetchError::List {
            dir: remote_dir.to_string(),
            source: e,
        })?;

    let mut candidates = Vec::new();
    for name in names.into_iter().filter(|n| n.contains(identifier)) {
        let path = join_remote(remote_dir, &name);
        let mtime = remote
            .mtime(&path)
            .await
            .map_err(|e| FetchError::Stat { path, source: e })?;
        candidates.push(RemoteCandidate { name, mtime });
    }

    tracing::debug!(
        report = identifier,
        matches = candidates.len(),
        "Scanned remote listing"
    );
    Ok(select_newest(candidates))
}

/// Select the newest matching file and download it into `staging_dir`
/// under its remote basename.
///
/// A failed transfer removes any partially written staged file before
/// returning the error.
pub async fn select_and_fetch(
    remote: &dyn RemoteFs,
    identifier: &str,
    remote_dir: &str,
    staging_dir: &Path,
) -> Result<FetchOutcome, FetchError> {
    let newest = match find_newest(remote, identifier, remote_dir).await? {
        Some(candidate) => candidate,
        None => return Ok(FetchOutcome::NotFound),
    };

    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|e| FetchError::Staging {
            path: staging_dir.to_path_buf(),
            source: e,
        })?;

    let remote_path = join_remote(remote_dir, &newest.name);
    let local_path = staging_dir.join(&newest.name);

    tracing::info!(
        report = identifier,
        remote = %remote_path,
        mtime = %newest.mtime,
        "Downloading newest match"
    );

    if let Err(e) = remote.fetch(&remote_path, &local_path).await {
        if let Err(rm) = tokio::fs::remove_file(&local_path).await {
            if rm.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %local_path.display(),
                    error = %rm,
                    "Could not remove partial download"
                );
            }
        }
        return Err(FetchError::Transfer {
            filename: newest.name,
            source: e,
        });
    }

    Ok(FetchOutcome::Fetched(StagedFile {
        remote_name: newest.name,
        path: local_path,
    }))
}
