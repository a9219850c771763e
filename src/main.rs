//! reportsync: pull the newest copy of each configured report from an SFTP
//! drop, deliver content that has not been seen before, and mail a summary.
//!
//! Each report is matched by a substring of the remote file name. The newest
//! match is staged locally, fingerprinted with SHA-256, and compared against
//! an append-only history; only new content reaches the report's destination.

#![warn(clippy::all)]

mod batch;
mod cli;
mod config;
mod fetch;
mod fingerprint;
mod history;
mod lock;
mod notify;
mod remote;
mod router;
mod types;

use std::future::Future;
use std::io::IsTerminal;
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Command, SyncArgs};
use config::Config;
use history::{FingerprintRecord, FingerprintStore};
use notify::{notify_best_effort, LogNotifier, Notifier, SmtpNotifier};
use remote::{RemoteError, RemoteFs, SftpRemote};

/// Load the config file and fold in secrets from the command line/env.
fn load_config(cli: &cli::Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(&cli.config)?;
    config.apply_secrets(cli.sftp_password.clone(), cli.smtp_password.clone());
    tracing::debug!(?config, "Loaded configuration");
    Ok(config)
}

fn build_notifier(config: &Config) -> anyhow::Result<Box<dyn Notifier>> {
    match &config.notify {
        Some(n) => {
            let notifier = SmtpNotifier::new(&n.smtp)
                .context("Invalid [notify] settings")?;
            Ok(Box::new(notifier))
        }
        None => Ok(Box::new(LogNotifier)),
    }
}

fn connection_failure_body(config: &Config, error: &dyn std::fmt::Display) -> String {
    format!(
        "Could not connect to SFTP server {}:{} as {}: {}\n\n\
         No reports were processed.\n",
        config.remote.host, config.remote.port, config.remote.username, error
    )
}

/// Most recent record whose subject mentions `identifier`.
fn latest_for_report<'a>(
    records: &'a [FingerprintRecord],
    identifier: &str,
) -> Option<&'a FingerprintRecord> {
    records
        .iter()
        .rev()
        .find(|r| r.subject.contains(identifier))
}

/// Run the status command.
async fn run_status(cli: &cli::Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let path = &config.history_file;

    if !path.exists() {
        println!("No fingerprint history found at {}", path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let store = history::open_store(config.history_format, path).await?;
    let summary = store.summary().await?;
    let records = store.records().await?;

    println!(
        "Fingerprint history: {} ({})",
        path.display(),
        config.history_format.as_str()
    );
    println!();
    println!("Records:");
    println!("  Total:            {}", summary.total_records);
    println!("  Distinct digests: {}", summary.distinct_digests);
    if let Some(last) = &summary.last {
        println!("  Last recorded:    {} ({})", last.recorded_at, last.subject);
    }
    println!();
    println!("Reports:");
    for report in &config.reports {
        match latest_for_report(&records, &report.identifier) {
            Some(r) => println!(
                "  {:<20} {}  {}",
                report.identifier, r.digest, r.recorded_at
            ),
            None => println!("  {:<20} (never recorded)", report.identifier),
        }
    }

    Ok(())
}

/// Run the fingerprint command.
async fn run_fingerprint(file: &Path) -> anyhow::Result<()> {
    let digest = fingerprint::fingerprint(file).await?;
    println!("{}  {}", digest, file.display());
    Ok(())
}

/// One batch: connect, process every report, disconnect, then notify.
///
/// `connect` opens the remote session; dropping the session closes it.
async fn sync_once<R, C, Fut>(
    config: &Config,
    connect: C,
    store: &dyn FingerprintStore,
    notifier: &dyn Notifier,
    dry_run: bool,
) -> anyhow::Result<()>
where
    R: RemoteFs,
    C: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, RemoteError>>,
{
    let r = &config.remote;
    let remote = match connect().await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::error!(host = %r.host, port = r.port, error = %e, "Could not connect");
            if !dry_run {
                let body = connection_failure_body(config, &e);
                notify_best_effort(notifier, config.subject(), &body).await;
            }
            return Err(e.into());
        }
    };
    tracing::info!(host = %r.host, directory = %r.directory, "Connected");

    let log = batch::run_batch(
        &remote,
        store,
        &config.reports,
        &config.batch_settings(dry_run),
    )
    .await;

    // Release the session before anything slow happens on the mail side.
    drop(remote);

    if dry_run {
        print!("{}", log.render());
    } else {
        notify_best_effort(notifier, config.subject(), &log.render()).await;
    }
    Ok(())
}

/// Run the sync command, once or on an interval.
async fn run_sync(cli: &cli::Cli, args: SyncArgs) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    tracing::info!(
        reports = config.reports.len(),
        dry_run = args.dry_run,
        "Starting reportsync"
    );

    let password = match config.remote.password.clone() {
        Some(p) => p,
        None if std::io::stdin().is_terminal() => {
            tokio::task::block_in_place(|| rpassword::prompt_password("SFTP Password: "))
                .context("Failed to read SFTP password")?
        }
        None => anyhow::bail!(
            "No SFTP password configured. Set REPORTSYNC_SFTP_PASSWORD, \
             pass --sftp-password, or add remote.password to {}",
            cli.config.display()
        ),
    };

    let _lock = lock::acquire(&config.history_file).await?;
    let store = history::open_store(config.history_format, &config.history_file).await?;
    let notifier = build_notifier(&config)?;

    loop {
        let r = &config.remote;
        let result = sync_once(
            &config,
            || SftpRemote::connect(&r.host, r.port, &r.username, &password),
            store.as_ref(),
            notifier.as_ref(),
            args.dry_run,
        )
        .await;

        let Some(interval) = args.watch_with_interval else {
            return result;
        };
        if let Err(e) = result {
            tracing::error!("Sync failed: {:#}", e);
        }

        tracing::info!("Waiting {} seconds...", interval);
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted during wait, exiting...");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command_or_default() {
        Command::Status => run_status(&cli).await,
        Command::Fingerprint { file } => run_fingerprint(&file).await,
        Command::Sync(args) => run_sync(&cli, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subject: &str, digest: &str) -> FingerprintRecord {
        FingerprintRecord {
            subject: subject.to_string(),
            digest: digest.to_string(),
            recorded_at: "2025-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_latest_for_report_takes_last_match() {
        let records = vec![
            record("download/Report_1_a.csv", "d1"),
            record("download/Report_2_a.csv", "d2"),
            record("download/Report_1_b.csv", "d3"),
        ];
        assert_eq!(latest_for_report(&records, "Report_1").unwrap().digest, "d3");
        assert_eq!(latest_for_report(&records, "Report_2").unwrap().digest, "d2");
        assert!(latest_for_report(&records, "Report_3").is_none());
    }

    #[test]
    fn test_connection_failure_body_names_the_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reportsync.toml");
        std::fs::write(
            &path,
            "[remote]\nhost = \"sftp.example.com\"\nusername = \"robot\"\n\
             [[reports]]\nidentifier = \"Report_1\"\ndestination = \"Transfer_1\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        let body = connection_failure_body(&config, &"connection refused");
        assert!(body.starts_with("Could not connect to SFTP server sftp.example.com:22 as robot"));
        assert!(body.contains("connection refused"));
        assert!(body.contains("No reports were processed."));
    }

    #[tokio::test]
    async fn test_connect_failure_still_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reportsync.toml");
        std::fs::write(
            &path,
            "[remote]\nhost = \"127.0.0.1\"\nport = 1\nusername = \"robot\"\n\
             [[reports]]\nidentifier = \"Report_1\"\ndestination = \"Transfer_1\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        let store = history::CsvHistory::open(&dir.path().join("checksum.txt")).unwrap();
        let notifier = notify::testing::RecordingNotifier::default();

        let r = &config.remote;
        let result = sync_once(
            &config,
            || SftpRemote::connect(&r.host, r.port, &r.username, "pw"),
            &store,
            &notifier,
            false,
        )
        .await;

        assert!(result.is_err());
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, config::DEFAULT_SUBJECT);
        assert!(sent[0].1.contains("No reports were processed."));
    }

    #[tokio::test]
    async fn test_partial_failure_sends_one_combined_message() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("Transfer_1")).unwrap();
        std::fs::create_dir_all(root.join("Transfer_2")).unwrap();
        let path = root.join("reportsync.toml");
        std::fs::write(
            &path,
            format!(
                "[remote]\nhost = \"sftp.example.com\"\nusername = \"robot\"\ndirectory = \"/Outbound\"\n\
                 [local]\nstaging_dir = \"{root}/download\"\noverflow_dir = \"{root}/transfer\"\n\
                 history_file = \"{root}/checksum.txt\"\n\
                 [[reports]]\nidentifier = \"Report_1\"\ndestination = \"{root}/Transfer_1\"\n\
                 [[reports]]\nidentifier = \"Report_2\"\ndestination = \"{root}/Transfer_2\"\n",
                root = root.display()
            ),
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        let store = history::CsvHistory::open(&config.history_file).unwrap();
        let notifier = notify::testing::RecordingNotifier::default();
        let fake = remote::testing::FakeRemote::new()
            .with_file("Report_1.csv", 100, b"a")
            .with_file("Report_2.csv", 100, b"b")
            .failing_on("Report_1.csv");

        let connect = move || async move { Ok::<_, RemoteError>(fake) };
        sync_once(&config, connect, &store, &notifier, false)
            .await
            .unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let body = &sent[0].1;
        assert!(body.contains("Report_1 - Failed to download Report_1.csv"), "{}", body);
        assert!(body.contains("Report_2 - Updated"), "{}", body);
        assert!(root.join("Transfer_2").join("Report_2.csv").exists());
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let path = root.join("reportsync.toml");
        std::fs::write(
            &path,
            format!(
                "[remote]\nhost = \"sftp.example.com\"\nusername = \"robot\"\n\
                 [local]\nstaging_dir = \"{root}/download\"\n\
                 [[reports]]\nidentifier = \"Report_1\"\ndestination = \"{root}/Transfer_1\"\n",
                root = root.display()
            ),
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        let store = history::CsvHistory::open(&root.join("checksum.txt")).unwrap();
        let notifier = notify::testing::RecordingNotifier::default();
        let fake = remote::testing::FakeRemote::new().with_file("Report_1.csv", 100, b"a");

        let connect = move || async move { Ok::<_, RemoteError>(fake) };
        sync_once(&config, connect, &store, &notifier, true)
            .await
            .unwrap();

        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(!root.join("download").exists());
    }
}
