//! Text-file history, one `subject,digest,timestamp` record per line.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::StoreError;
use super::{now_timestamp, FingerprintRecord, FingerprintStore};

/// Append-only CSV history.
///
/// Fields are quoted only when they need to be, so files written before
/// quoting was introduced read back unchanged. Older writers never escaped
/// commas in the subject; such lines have more than three fields and are
/// recovered by taking the last two as digest and timestamp.
///
/// No handle is kept open: every call opens the file for its own duration.
#[derive(Debug)]
pub struct CsvHistory {
    path: PathBuf,
}

impl CsvHistory {
    /// Open the history, creating an empty file (and its parent directory)
    /// if it does not exist yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<FingerprintRecord>, StoreError> {
        let file = std::fs::File::open(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut records = Vec::new();
        for result in reader.records() {
            let row = result?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            records.push(parse_row(&row, line)?);
        }
        Ok(records)
    }

    fn append_row(&self, subject: &str, digest: &str) -> Result<(), StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        writer.write_record([subject, digest, now_timestamp().as_str()])?;
        writer.flush().map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }
}

fn parse_row(row: &csv::StringRecord, line: u64) -> Result<FingerprintRecord, StoreError> {
    let n = row.len();
    if n < 3 {
        return Err(StoreError::Malformed {
            line,
            reason: format!("expected 3 fields, found {}", n),
        });
    }
    let fields: Vec<&str> = row.iter().collect();
    let digest = fields[n - 2].trim();
    if digest.is_empty() {
        return Err(StoreError::Malformed {
            line,
            reason: "empty digest".to_string(),
        });
    }
    Ok(FingerprintRecord {
        subject: fields[..n - 2].join(","),
        digest: digest.to_string(),
        recorded_at: fields[n - 1].trim().to_string(),
    })
}

#[async_trait]
impl FingerprintStore for CsvHistory {
    async fn records(&self) -> Result<Vec<FingerprintRecord>, StoreError> {
        self.read_all()
    }

    async fn append(&self, subject: &str, digest: &str) -> Result<(), StoreError> {
        self.append_row(subject, digest)
    }
}
