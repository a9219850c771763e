use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "reportsync",
    version,
    about = "Fetch the newest report files from an SFTP drop and deliver new content"
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long, global = true, default_value = "reportsync.toml")]
    pub config: PathBuf,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, global = true, default_value = "info")]
    pub log_level: LogLevel,

    /// SFTP password (if not provided, will prompt).
    /// WARNING: passing via --sftp-password is visible in process listings.
    /// Prefer the REPORTSYNC_SFTP_PASSWORD environment variable instead.
    #[arg(long, global = true, env = "REPORTSYNC_SFTP_PASSWORD", hide_env_values = true)]
    pub sftp_password: Option<String>,

    /// SMTP password for the notification relay
    #[arg(long, global = true, env = "REPORTSYNC_SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, deduplicate and deliver every configured report (default)
    Sync(SyncArgs),

    /// Show the fingerprint history and the last digest recorded per report
    Status,

    /// Print the SHA-256 fingerprint of a local file
    Fingerprint {
        /// File to hash
        file: PathBuf,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct SyncArgs {
    /// List and select remote files without downloading, moving or recording
    #[arg(long)]
    pub dry_run: bool,

    /// Run continuously, waiting N seconds between runs
    #[arg(long, value_name = "SECS")]
    pub watch_with_interval: Option<u64>,
}

impl Cli {
    /// The subcommand, with `sync` when none was given.
    pub fn command_or_default(&self) -> Command {
        match &self.command {
            Some(Command::Sync(args)) => Command::Sync(args.clone()),
            Some(Command::Status) => Command::Status,
            Some(Command::Fingerprint { file }) => Command::Fingerprint { file: file.clone() },
            None => Command::Sync(SyncArgs::default()),
        }
    }
}
