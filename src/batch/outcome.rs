//! Outcome log: one human-readable entry per report definition, rendered as
//! the body of the end-of-run notification.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Updated {
        digest: String,
        staged: PathBuf,
        destination: PathBuf,
    },
    NoUpdate {
        digest: String,
        staged: PathBuf,
    },
    AlreadyExists {
        digest: String,
        staged: PathBuf,
        destination: PathBuf,
    },
    /// No remote file matched the identifier.
    NotFound,
    /// Dry run: the file that would have been downloaded.
    WouldFetch {
        filename: String,
        mtime: DateTime<Utc>,
    },
    TransferFailed {
        error: String,
    },
    FingerprintFailed {
        filename: String,
        error: String,
    },
    RouteFailed {
        error: String,
    },
}

impl ReportOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ReportOutcome::TransferFailed { .. }
                | ReportOutcome::FingerprintFailed { .. }
                | ReportOutcome::RouteFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeEntry {
    pub identifier: String,
    pub outcome: ReportOutcome,
    /// Extra line for problems that did not change the outcome.
    pub note: Option<String>,
}

impl OutcomeEntry {
    pub fn new(identifier: &str, outcome: ReportOutcome) -> Self {
        Self {
            identifier: identifier.to_string(),
            outcome,
            note: None,
        }
    }
}

fn write_routed(
    f: &mut fmt::Formatter<'_>,
    identifier: &str,
    label: &str,
    digest: &str,
    staged: &std::path::Path,
) -> fmt::Result {
    write!(
        f,
        "{} - {}\n   Checksum: {}\n   File: {}",
        identifier,
        label,
        digest,
        staged.display()
    )
}

impl fmt::Display for OutcomeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.identifier;
        match &self.outcome {
            ReportOutcome::Updated { digest, staged, .. } => {
                write_routed(f, id, "Updated", digest, staged)?
            }
            ReportOutcome::NoUpdate { digest, staged } => {
                write_routed(f, id, "No Update", digest, staged)?
            }
            ReportOutcome::AlreadyExists { digest, staged, .. } => {
                write_routed(f, id, "File already exists", digest, staged)?
            }
            ReportOutcome::NotFound => write!(f, "{} - No matching remote file", id)?,
            ReportOutcome::WouldFetch { filename, mtime } => write!(
                f,
                "{} - Would fetch {} (modified {})",
                id,
                filename,
                mtime.format("%Y-%m-%d %H:%M:%S UTC")
            )?,
            ReportOutcome::TransferFailed { error } => write!(f, "{} - {}", id, error)?,
            ReportOutcome::FingerprintFailed { filename, error } => write!(
                f,
                "{} - Error calculating checksum for {}, skipping file: {}",
                id, filename, error
            )?,
            ReportOutcome::RouteFailed { error } => write!(f, "{} - {}", id, error)?,
        }
        if let Some(note) = &self.note {
            write!(f, "\n   Note: {}", note)?;
        }
        Ok(())
    }
}

/// Per-kind tallies for the end-of-run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub updated: usize,
    pub no_update: usize,
    pub already_exists: usize,
    pub not_found: usize,
    pub would_fetch: usize,
    pub failed: usize,
}

/// Ordered outcome entries for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeLog {
    entries: Vec<OutcomeEntry>,
}

impl OutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: OutcomeEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[OutcomeEntry] {
        &self.entries
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for entry in &self.entries {
            match entry.outcome {
                ReportOutcome::Updated { .. } => counts.updated += 1,
                ReportOutcome::NoUpdate { .. } => counts.no_update += 1,
                ReportOutcome::AlreadyExists { .. } => counts.already_exists += 1,
                ReportOutcome::NotFound => counts.not_found += 1,
                ReportOutcome::WouldFetch { .. } => counts.would_fetch += 1,
                ReportOutcome::TransferFailed { .. }
                | ReportOutcome::FingerprintFailed { .. }
                | ReportOutcome::RouteFailed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    /// Plain-text body: entries separated by blank lines.
    pub fn render(&self) -> String {
        let mut body = self
            .entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n\n");
        if !body.is_empty() {
            body.push('\n');
        }
        body
    }
}
