//! Fingerprint history: an append-only log of `(subject, digest, time)`
//! records answering "has this content already been accepted for this
//! report?".
//!
//! Two backends share the [`FingerprintStore`] trait:
//! - [`CsvHistory`], a line-per-record text file (the default)
//! - [`SqliteHistory`], an append-only table for larger installations

pub mod csv_store;
pub mod error;
pub mod schema;
pub mod sqlite_store;

use std::path::Path;

use async_trait::async_trait;

use crate::types::HistoryFormat;

pub use csv_store::CsvHistory;
pub use error::StoreError;
pub use sqlite_store::SqliteHistory;

/// One accepted-content record. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRecord {
    /// Local path the content was staged at when it was recorded.
    pub subject: String,
    /// Lowercase hex SHA-256.
    pub digest: String,
    /// RFC 3339 timestamp (older CSV files carry a space-separated form).
    pub recorded_at: String,
}

impl FingerprintRecord {
    /// Whether this record marks `digest` as already seen for `identifier`.
    pub fn matches(&self, identifier: &str, digest: &str) -> bool {
        self.digest == digest && self.subject.contains(identifier)
    }
}

/// Aggregate view used by the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySummary {
    pub total_records: u64,
    pub distinct_digests: u64,
    pub last: Option<FingerprintRecord>,
}

#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// All records in insertion order.
    async fn records(&self) -> Result<Vec<FingerprintRecord>, StoreError>;

    /// Append one record stamped with the current local time.
    async fn append(&self, subject: &str, digest: &str) -> Result<(), StoreError>;

    /// Whether some record has this digest and a subject containing
    /// `identifier`.
    async fn contains(&self, identifier: &str, digest: &str) -> Result<bool, StoreError> {
        let records = self.records().await?;
        Ok(records.iter().any(|r| r.matches(identifier, digest)))
    }

    /// Dedup query with fail-open semantics: an unreadable or corrupt
    /// history reports the content as new.
    async fn is_new_content(&self, identifier: &str, digest: &str) -> bool {
        match self.contains(identifier, digest).await {
            Ok(seen) => !seen,
            Err(e) => {
                tracing::warn!(
                    report = identifier,
                    digest,
                    error = %e,
                    "Fingerprint history unreadable, treating content as new"
                );
                true
            }
        }
    }

    async fn summary(&self) -> Result<HistorySummary, StoreError> {
        let records = self.records().await?;
        let mut digests: Vec<&str> = records.iter().map(|r| r.digest.as_str()).collect();
        digests.sort_unstable();
        digests.dedup();
        Ok(HistorySummary {
            total_records: records.len() as u64,
            distinct_digests: digests.len() as u64,
            last: records.last().cloned(),
        })
    }
}

/// Open (creating if absent) the history at `path` in the given format.
pub async fn open_store(
    format: HistoryFormat,
    path: &Path,
) -> Result<Box<dyn FingerprintStore>, StoreError> {
    let store: Box<dyn FingerprintStore> = match format {
        HistoryFormat::Csv => Box::new(CsvHistory::open(path)?),
        HistoryFormat::Sqlite => Box::new(SqliteHistory::open(path).await?),
    };
    tracing::debug!(
        format = format.as_str(),
        path = %path.display(),
        "Fingerprint history opened"
    );
    Ok(store)
}

/// Current local time in the format written to new records.
pub(crate) fn now_timestamp() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}
