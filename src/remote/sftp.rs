//! SFTP implementation of [`RemoteFs`] on top of libssh2.

use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ssh2::{ErrorCode, Session, Sftp};

use super::{RemoteError, RemoteFs};

/// libssh2's `LIBSSH2_FX_NO_SUCH_FILE`.
const SFTP_NO_SUCH_FILE: i32 = 2;

struct Connection {
    // Dropped before `session`; the SFTP channel must not outlive it.
    sftp: Sftp,
    session: Session,
}

/// An authenticated SFTP session.
///
/// libssh2 handles are blocking, so every call holds the connection mutex
/// for its full duration. The batch is sequential anyway. The session is
/// disconnected by [`SftpRemote::close`] or, failing that, on drop.
pub struct SftpRemote {
    conn: Mutex<Option<Connection>>,
    host: String,
}

impl std::fmt::Debug for SftpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpRemote")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl SftpRemote {
    /// Open a TCP connection, run the SSH handshake, authenticate with a
    /// password and start the SFTP subsystem.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<Self, RemoteError> {
        let host = host.to_string();
        let username = username.to_string();
        let password = password.to_string();
        let host_clone = host.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let tcp = TcpStream::connect((host_clone.as_str(), port)).map_err(|e| {
                RemoteError::Connect {
                    host: host_clone.clone(),
                    port,
                    source: e,
                }
            })?;

            let mut session = Session::new()?;
            session.set_tcp_stream(tcp);
            session.handshake()?;
            session.userauth_password(&username, &password)?;
            if !session.authenticated() {
                return Err(RemoteError::AuthenticationFailed(username));
            }

            let sftp = session.sftp()?;
            Ok::<_, RemoteError>(Connection { sftp, session })
        })
        .await??;

        tracing::info!(host = %host, port, "SFTP session established");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            host,
        })
    }

    /// Disconnect the SSH session. Safe to call more than once.
    pub fn close(&self) {
        let taken = match self.conn.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(Connection { sftp, session }) = taken {
            drop(sftp);
            if let Err(e) = session.disconnect(None, "closing", None) {
                tracing::debug!(error = %e, "SSH disconnect failed");
            }
            tracing::debug!(host = %self.host, "SFTP session closed");
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let guard = self.conn.lock().map_err(|_| RemoteError::Poisoned)?;
        let conn = guard.as_ref().ok_or(RemoteError::Closed)?;
        f(conn)
    }
}

impl Drop for SftpRemote {
    fn drop(&mut self) {
        self.close();
    }
}

fn classify(err: ssh2::Error, path: &str) -> RemoteError {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => RemoteError::NotFound(path.to_string()),
        _ => RemoteError::Ssh(err),
    }
}

#[async_trait]
impl RemoteFs for SftpRemote {
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>, RemoteError> {
        self.with_conn(|conn| {
            let entries = conn
                .sftp
                .readdir(Path::new(dir))
                .map_err(|e| classify(e, dir))?;
            Ok(entries
                .into_iter()
                .filter_map(|(path, _)| {
                    path.file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .collect())
        })
    }

    async fn mtime(&self, path: &str) -> Result<DateTime<Utc>, RemoteError> {
        self.with_conn(|conn| {
            let stat = conn
                .sftp
                .stat(Path::new(path))
                .map_err(|e| classify(e, path))?;
            stat.mtime
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
                .ok_or_else(|| RemoteError::MissingMtime(path.to_string()))
        })
    }

    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError> {
        self.with_conn(|conn| {
            let mut remote = conn
                .sftp
                .open(Path::new(remote_path))
                .map_err(|e| classify(e, remote_path))?;
            let mut local = std::fs::File::create(local_path).map_err(|e| RemoteError::Local {
                path: local_path.to_path_buf(),
                source: e,
            })?;
            let bytes = io::copy(&mut remote, &mut local)?;
            local.sync_all().map_err(|e| RemoteError::Local {
                path: local_path.to_path_buf(),
                source: e,
            })?;
            tracing::debug!(remote = remote_path, bytes, "Transfer complete");
            Ok(())
        })
    }
}
