//! Content fingerprints: lowercase hex SHA-256 of a file's full bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Read buffer size. Bounds memory use regardless of file size.
pub const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Fingerprint task failed: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}

/// Hash everything `reader` yields, `chunk_size` bytes at a time.
pub fn digest_reader<R: Read>(mut reader: R, chunk_size: usize) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    let hash = hasher.finalize();
    Ok(hash.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Blocking fingerprint of a local file.
pub fn fingerprint_file(path: &Path) -> Result<String, FingerprintError> {
    let file = File::open(path).map_err(|e| FingerprintError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    digest_reader(file, CHUNK_SIZE).map_err(|e| FingerprintError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Fingerprint a local file on the blocking pool.
pub async fn fingerprint(path: &Path) -> Result<String, FingerprintError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_file(&path)).await?
}
