//! Batch orchestrator: runs every report definition in order through
//! fetch, fingerprint, and route, collecting one outcome entry per report.
//! A failure in one report is recorded and the batch moves on.

pub mod outcome;

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Deserialize;

use crate::fetch::{self, FetchOutcome};
use crate::fingerprint;
use crate::history::FingerprintStore;
use crate::remote::RemoteFs;
use crate::router::{DedupRouter, RouteOutcome};

pub use outcome::{OutcomeEntry, OutcomeLog, ReportOutcome};

/// One `(identifier, destination)` pair from the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportDefinition {
    /// Case-sensitive substring matched against remote file names.
    pub identifier: String,
    /// Local directory that receives new content for this report.
    pub destination: PathBuf,
}

/// Subset of application config consumed by the batch.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub(crate) remote_dir: String,
    pub(crate) staging_dir: PathBuf,
    pub(crate) overflow_dir: PathBuf,
    pub(crate) dry_run: bool,
}

/// Process every report sequentially and return the outcome log.
///
/// The remote session is shared by all reports and left open; the caller
/// closes it.
pub async fn run_batch(
    remote: &dyn RemoteFs,
    store: &dyn FingerprintStore,
    reports: &[ReportDefinition],
    settings: &BatchSettings,
) -> OutcomeLog {
    let started = Instant::now();
    let router = DedupRouter::new(store, &settings.overflow_dir);
    let mut log = OutcomeLog::new();

    for report in reports {
        let entry = if settings.dry_run {
            preview_report(remote, report, settings).await
        } else {
            process_report(remote, &router, report, settings).await
        };
        log.push(entry);
    }

    log_summary(&log, settings.dry_run, started);
    log
}

async fn preview_report(
    remote: &dyn RemoteFs,
    report: &ReportDefinition,
    settings: &BatchSettings,
) -> OutcomeEntry {
    let id = report.identifier.as_str();
    let outcome = match fetch::find_newest(remote, id, &settings.remote_dir).await {
        Ok(Some(candidate)) => {
            tracing::info!(
                "[DRY RUN] Would fetch {} for {}",
                candidate.name,
                id
            );
            ReportOutcome::WouldFetch {
                filename: candidate.name,
                mtime: candidate.mtime,
            }
        }
        Ok(None) => {
            tracing::info!(report = id, "No matching remote file");
            ReportOutcome::NotFound
        }
        Err(e) => {
            tracing::error!(report = id, error = %e, "Remote scan failed");
            ReportOutcome::TransferFailed {
                error: e.to_string(),
            }
        }
    };
    OutcomeEntry::new(id, outcome)
}

async fn process_report(
    remote: &dyn RemoteFs,
    router: &DedupRouter<'_>,
    report: &ReportDefinition,
    settings: &BatchSettings,
) -> OutcomeEntry {
    let id = report.identifier.as_str();

    let staged = match fetch::select_and_fetch(
        remote,
        id,
        &settings.remote_dir,
        &settings.staging_dir,
    )
    .await
    {
        Ok(FetchOutcome::Fetched(staged)) => staged,
        Ok(FetchOutcome::NotFound) => {
            tracing::info!(report = id, "No matching remote file");
            return OutcomeEntry::new(id, ReportOutcome::NotFound);
        }
        Err(e) => {
            tracing::error!(
                report = id,
                file = e.filename().unwrap_or("-"),
                error = %e,
                "Transfer failed"
            );
            return OutcomeEntry::new(
                id,
                ReportOutcome::TransferFailed {
                    error: e.to_string(),
                },
            );
        }
    };

    let digest = match fingerprint::fingerprint(&staged.path).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(
                report = id,
                path = %staged.path.display(),
                error = %e,
                "Error calculating checksum, skipping file"
            );
            remove_staged(&staged.path).await;
            return OutcomeEntry::new(
                id,
                ReportOutcome::FingerprintFailed {
                    filename: staged.remote_name,
                    error: e.to_string(),
                },
            );
        }
    };

    let routed = match router
        .route(id, &staged.path, &digest, &report.destination)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(report = id, error = %e, "Routing failed");
            return OutcomeEntry::new(
                id,
                ReportOutcome::RouteFailed {
                    error: e.to_string(),
                },
            );
        }
    };

    let staged_path = staged.path;
    let outcome = match routed.outcome {
        RouteOutcome::Updated { destination } => {
            tracing::info!(
                report = id,
                destination = %destination.display(),
                "Updated"
            );
            ReportOutcome::Updated {
                digest,
                staged: staged_path,
                destination,
            }
        }
        RouteOutcome::NoUpdate => {
            tracing::info!(report = id, "No update, content already recorded");
            ReportOutcome::NoUpdate {
                digest,
                staged: staged_path,
            }
        }
        RouteOutcome::AlreadyExists { destination } => {
            tracing::info!(
                report = id,
                destination = %destination.display(),
                "File already exists at destination"
            );
            ReportOutcome::AlreadyExists {
                digest,
                staged: staged_path,
                destination,
            }
        }
    };

    let mut entry = OutcomeEntry::new(id, outcome);
    if let Some(e) = routed.history_error {
        entry.note = Some(format!("fingerprint not recorded ({})", e));
    }
    entry
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to delete staged file");
    }
}

fn log_summary(log: &OutcomeLog, dry_run: bool, started: Instant) {
    let c = log.counts();
    if dry_run {
        tracing::info!("── Dry Run Summary ──");
        tracing::info!(
            "  {} would be fetched, {} not found, {} failed",
            c.would_fetch,
            c.not_found,
            c.failed
        );
    } else {
        tracing::info!("── Summary ──");
        tracing::info!(
            "  {} updated, {} unchanged, {} already present, {} not found, {} failed",
            c.updated,
            c.no_update,
            c.already_exists,
            c.not_found,
            c.failed
        );
    }
    tracing::info!("  elapsed: {:.1}s", started.elapsed().as_secs_f64());
}
