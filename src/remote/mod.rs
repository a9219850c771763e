//! Remote filesystem capability.
//!
//! The batch only needs three things from the far side: a directory listing,
//! a modification time, and a way to copy one file down. [`RemoteFs`] keeps
//! those behind a trait so the pipeline can run against [`SftpRemote`] in
//! production and an in-memory double in tests.

pub mod error;
pub mod sftp;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::RemoteError;
pub use sftp::SftpRemote;

#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Bare entry names in `dir`, in whatever order the server returns them.
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>, RemoteError>;

    /// Last modification time of a remote path.
    async fn mtime(&self, path: &str) -> Result<DateTime<Utc>, RemoteError>;

    /// Copy `remote_path` to `local_path`, overwriting any existing file.
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError>;
}

/// Join a remote directory and an entry name with `/`, independent of the
/// local platform's separator.
pub fn join_remote(dir: &str, name: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() && dir.starts_with('/') {
        format!("/{}", name)
    } else if trimmed.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", trimmed, name)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;

    /// In-memory remote directory. Entries keep insertion order so listing
    /// order is deterministic in tests.
    #[derive(Default)]
    pub(crate) struct FakeRemote {
        entries: Mutex<Vec<(String, i64, Vec<u8>)>>,
        failing: HashSet<String>,
        directories: HashSet<String>,
        pub(crate) fetches: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_file(self, name: &str, mtime: i64, content: &[u8]) -> Self {
            self.put(name, mtime, content);
            self
        }

        pub(crate) fn failing_on(mut self, name: &str) -> Self {
            self.failing.insert(name.to_string());
            self
        }

        /// Fetching `name` "succeeds" but leaves a directory at the local
        /// path, which cannot be read back as a file.
        pub(crate) fn directory_on(mut self, name: &str) -> Self {
            self.directories.insert(name.to_string());
            self
        }

        pub(crate) fn put(&self, name: &str, mtime: i64, content: &[u8]) {
            let mut entries = self.entries.lock().unwrap();
            entries.retain(|(n, _, _)| n != name);
            entries.push((name.to_string(), mtime, content.to_vec()));
        }

        pub(crate) fn fetch_count(&self) -> usize {
            self.fetches.lock().unwrap().len()
        }

        fn basename(path: &str) -> &str {
            path.rsplit('/').next().unwrap_or(path)
        }
    }

    #[async_trait]
    impl RemoteFs for FakeRemote {
        async fn list_dir(&self, _dir: &str) -> Result<Vec<String>, RemoteError> {
            let entries = self.entries.lock().unwrap();
            Ok(entries.iter().map(|(n, _, _)| n.clone()).collect())
        }

        async fn mtime(&self, path: &str) -> Result<DateTime<Utc>, RemoteError> {
            let name = Self::basename(path);
            let entries = self.entries.lock().unwrap();
            let (_, secs, _) = entries
                .iter()
                .find(|(n, _, _)| n == name)
                .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
            Utc.timestamp_opt(*secs, 0)
                .single()
                .ok_or_else(|| RemoteError::MissingMtime(path.to_string()))
        }

        async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError> {
            let name = Self::basename(remote_path);
            self.fetches.lock().unwrap().push(name.to_string());
            if self.failing.contains(name) {
                return Err(RemoteError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "permission denied",
                )));
            }
            if self.directories.contains(name) {
                return std::fs::create_dir(local_path).map_err(|e| RemoteError::Local {
                    path: local_path.to_path_buf(),
                    source: e,
                });
            }
            let content = {
                let entries = self.entries.lock().unwrap();
                entries
                    .iter()
                    .find(|(n, _, _)| n == name)
                    .map(|(_, _, c)| c.clone())
                    .ok_or_else(|| RemoteError::NotFound(remote_path.to_string()))?
            };
            std::fs::write(local_path, content).map_err(|e| RemoteError::Local {
                path: local_path.to_path_buf(),
                source: e,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/Outbound", "a.csv"), "/Outbound/a.csv");
        assert_eq!(join_remote("/Outbound/", "a.csv"), "/Outbound/a.csv");
        assert_eq!(join_remote("/", "a.csv"), "/a.csv");
        assert_eq!(join_remote("", "a.csv"), "a.csv");
        assert_eq!(join_remote("in", "a.csv"), "in/a.csv");
    }
}
