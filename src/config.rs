use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::batch::{BatchSettings, ReportDefinition};
use crate::notify::SmtpSettings;
use crate::types::HistoryFormat;

pub const DEFAULT_SUBJECT: &str = "SFTP Downloader";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ── On-disk layout ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    remote: RemoteSection,
    #[serde(default)]
    local: LocalSection,
    notify: Option<NotifySection>,
    #[serde(default)]
    reports: Vec<ReportDefinition>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RemoteSection {
    host: String,
    #[serde(default = "default_ssh_port")]
    port: u16,
    username: String,
    password: Option<String>,
    #[serde(default = "default_remote_dir")]
    directory: String,
}

impl std::fmt::Debug for RemoteSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSection")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct LocalSection {
    staging_dir: String,
    overflow_dir: String,
    history_file: String,
    history_format: HistoryFormat,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            staging_dir: "download".to_string(),
            overflow_dir: "transfer".to_string(),
            history_file: "checksum.txt".to_string(),
            history_format: HistoryFormat::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    fn into_vec(self) -> Vec<String> {
        match self {
            Recipients::One(a) => vec![a],
            Recipients::Many(v) => v,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NotifySection {
    #[serde(default = "default_subject")]
    subject: String,
    from: String,
    to: Recipients,
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
}

impl std::fmt::Debug for NotifySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifySection")
            .field("smtp_host", &self.smtp_host)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_smtp_port() -> u16 {
    587
}

fn default_remote_dir() -> String {
    ".".to_string()
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

// ── Resolved configuration ─────────────────────────────────────────────

pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub directory: String,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("directory", &self.directory)
            .finish()
    }
}

#[derive(Debug)]
pub struct NotifyConfig {
    pub subject: String,
    pub smtp: SmtpSettings,
}

/// Application configuration, with local paths already `~`-expanded.
/// Relative paths are relative to the working directory.
#[derive(Debug)]
pub struct Config {
    pub remote: RemoteConfig,
    pub staging_dir: PathBuf,
    pub overflow_dir: PathBuf,
    pub history_file: PathBuf,
    pub history_format: HistoryFormat,
    /// `None` sends the end-of-run message to the log only.
    pub notify: Option<NotifyConfig>,
    pub reports: Vec<ReportDefinition>,
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_tilde(s),
        None => path.to_path_buf(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&text, path)
    }

    fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_file(file);
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: FileConfig) -> Self {
        let FileConfig {
            remote,
            local,
            notify,
            reports,
        } = file;

        let notify = notify.map(|n| NotifyConfig {
            subject: n.subject,
            smtp: SmtpSettings {
                host: n.smtp_host,
                port: n.smtp_port,
                // The sender doubles as the login when no username is given.
                username: n.smtp_username.or_else(|| Some(n.from.clone())),
                password: n.smtp_password,
                from: n.from,
                to: n.to.into_vec(),
            },
        });

        let reports = reports
            .into_iter()
            .map(|r| ReportDefinition {
                destination: expand_path(&r.destination),
                identifier: r.identifier,
            })
            .collect();

        Self {
            remote: RemoteConfig {
                host: remote.host,
                port: remote.port,
                username: remote.username,
                password: remote.password,
                directory: remote.directory,
            },
            staging_dir: expand_tilde(&local.staging_dir),
            overflow_dir: expand_tilde(&local.overflow_dir),
            history_file: expand_tilde(&local.history_file),
            history_format: local.history_format,
            notify,
            reports,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.host.trim().is_empty() {
            return Err(ConfigError::Invalid("remote.host must not be empty".into()));
        }
        if self.remote.username.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "remote.username must not be empty".into(),
            ));
        }
        if self.reports.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[reports]] entry is required".into(),
            ));
        }
        if let Some(i) = self.reports.iter().position(|r| r.identifier.is_empty()) {
            // An empty identifier would match every remote file.
            return Err(ConfigError::Invalid(format!(
                "reports[{}].identifier must not be empty",
                i
            )));
        }
        if let Some(n) = &self.notify {
            if n.smtp.to.is_empty() {
                return Err(ConfigError::Invalid(
                    "notify.to needs at least one recipient".into(),
                ));
            }
        }
        Ok(())
    }

    /// Secrets from the command line or environment win over the file.
    pub fn apply_secrets(&mut self, sftp_password: Option<String>, smtp_password: Option<String>) {
        if sftp_password.is_some() {
            self.remote.password = sftp_password;
        }
        if let (Some(n), Some(p)) = (self.notify.as_mut(), smtp_password) {
            n.smtp.password = Some(p);
        }
    }

    pub fn subject(&self) -> &str {
        self.notify
            .as_ref()
            .map(|n| n.subject.as_str())
            .unwrap_or(DEFAULT_SUBJECT)
    }

    pub fn batch_settings(&self, dry_run: bool) -> BatchSettings {
        BatchSettings {
            remote_dir: self.remote.directory.clone(),
            staging_dir: self.staging_dir.clone(),
            overflow_dir: self.overflow_dir.clone(),
            dry_run,
        }
    }
}
