//! FTP downloads over a blocking client on a worker thread
//!
//! The protocol session runs inside `spawn_blocking`. The async side owns the
//! stall watchdog and a breaker task: once the transfer's data socket exists,
//! the worker hands a clone of it to the breaker, which shuts it down when the
//! watchdog fires. The worker's blocked read then returns, and it aborts the
//! transfer on the control connection.

use super::{CHUNK_SIZE, ProgressReporter, TransferEngine, drive_transfer, verify_size};
use crate::config::{Config, FtpConfig, RetryPolicy};
use crate::error::TransferError;
use crate::types::{Event, Protocol, TransferOutcome, TransferTask};
use crate::watchdog::{Heartbeat, StallWatchdog};
use async_trait::async_trait;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use suppaftp::FtpStream;
use suppaftp::types::FileType;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

/// FTP transfer engine
pub struct FtpTransferEngine {
    config: Arc<Config>,
    events: broadcast::Sender<Event>,
}

impl FtpTransferEngine {
    /// Create the engine
    pub fn new(config: Arc<Config>, events: broadcast::Sender<Event>) -> Self {
        Self { config, events }
    }

    async fn attempt(
        &self,
        task: &TransferTask,
        policy: &RetryPolicy,
    ) -> Result<u64, TransferError> {
        let target = FtpTarget::parse(task.url(), &self.config.ftp)?;
        let watchdog = StallWatchdog::start(policy.idle_timeout);

        let (socket_tx, socket_rx) = oneshot::channel();
        let broken = Arc::new(AtomicBool::new(false));
        let breaker = tokio::spawn(break_on_stall(socket_rx, watchdog.token(), broken.clone()));

        let session = FtpSession {
            target,
            dest: task.dest_path(),
            connect_timeout: policy.connect_timeout,
            idle: policy.idle_timeout,
            tolerance: policy.size_tolerance,
            heartbeat: watchdog.heartbeat(),
            token: watchdog.token(),
            broken,
            filename: task.filename().to_string(),
            events: self.events.clone(),
        };

        let result = tokio::task::spawn_blocking(move || session.run(socket_tx)).await;
        breaker.abort();

        match result {
            Ok(result) => result,
            Err(e) => Err(TransferError::ConnectionFailure(format!(
                "ftp worker did not finish: {e}"
            ))),
        }
    }
}

#[async_trait]
impl TransferEngine for FtpTransferEngine {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    async fn download(&self, task: &TransferTask, policy: &RetryPolicy) -> TransferOutcome {
        drive_transfer(task, policy, &self.events, |_| self.attempt(task, policy)).await
    }
}

impl std::fmt::Debug for FtpTransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpTransferEngine")
            .field("anonymous_user", &self.config.ftp.anonymous_user)
            .finish()
    }
}

/// Connection details parsed from an `ftp://` URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FtpTarget {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) path: String,
}

impl FtpTarget {
    /// Parse `ftp://[user:pass@]host[:port]/path`, falling back to the
    /// configured anonymous credentials
    pub(crate) fn parse(url: &str, defaults: &FtpConfig) -> Result<Self, TransferError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransferError::ProtocolError(format!("invalid ftp url: {e}")))?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransferError::ProtocolError("ftp url has no host".to_string()))?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(21);

        let (user, password) = if parsed.username().is_empty() {
            (
                defaults.anonymous_user.clone(),
                defaults.anonymous_password.clone(),
            )
        } else {
            (
                decode(parsed.username()),
                parsed.password().map(decode).unwrap_or_default(),
            )
        };

        Ok(Self {
            host,
            port,
            user,
            password,
            path: decode(parsed.path()),
        })
    }

    fn socket_addr(&self) -> Result<SocketAddr, TransferError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                TransferError::ConnectionFailure(format!("cannot resolve {}: {e}", self.host))
            })?
            .next()
            .ok_or_else(|| {
                TransferError::ConnectionFailure(format!("no address for {}", self.host))
            })
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Shut the data socket down once the watchdog fires
///
/// `broken` is set before the shutdown so the reader can tell a forced end of
/// stream from the server closing the data connection.
async fn break_on_stall(
    socket: oneshot::Receiver<TcpStream>,
    token: CancellationToken,
    broken: Arc<AtomicBool>,
) {
    let Ok(socket) = socket.await else {
        return;
    };
    token.cancelled().await;
    broken.store(true, Ordering::SeqCst);
    if let Err(e) = socket.shutdown(Shutdown::Both) {
        tracing::debug!(error = %e, "data socket already closed");
    }
}

/// Everything one blocking attempt needs, moved onto the worker thread
struct FtpSession {
    target: FtpTarget,
    dest: PathBuf,
    connect_timeout: Duration,
    idle: Duration,
    tolerance: u64,
    heartbeat: Heartbeat,
    token: CancellationToken,
    broken: Arc<AtomicBool>,
    filename: String,
    events: broadcast::Sender<Event>,
}

impl FtpSession {
    fn run(self, socket_tx: oneshot::Sender<TcpStream>) -> Result<u64, TransferError> {
        let result = self.transfer(socket_tx);
        match result {
            // Broken sockets and timed-out replies after the deadline fired are the stall
            Err(
                TransferError::ConnectionFailure(_) | TransferError::ProtocolError(_),
            ) if self.token.is_cancelled() => {
                Err(TransferError::StallTimeout {
                    idle: self.idle,
                    bytes_received: 0,
                })
            }
            other => other,
        }
    }

    fn transfer(&self, socket_tx: oneshot::Sender<TcpStream>) -> Result<u64, TransferError> {
        let addr = self.target.socket_addr()?;
        let mut ftp = FtpStream::connect_timeout(addr, self.connect_timeout).map_err(|e| {
            TransferError::ConnectionFailure(format!("connect to {addr} failed: {e}"))
        })?;
        ftp.get_ref()
            .set_read_timeout(Some(self.idle))
            .map_err(|e| TransferError::ConnectionFailure(e.to_string()))?;
        // Every control reply counts as activity, not just data bytes
        self.heartbeat.beat();

        if let Err(e) = ftp.login(&self.target.user, &self.target.password) {
            let _ = ftp.quit();
            return Err(TransferError::AuthFailure(format!(
                "login as '{}' rejected: {e}",
                self.target.user
            )));
        }
        self.heartbeat.beat();

        ftp.transfer_type(FileType::Binary)
            .map_err(|e| TransferError::ProtocolError(format!("TYPE I failed: {e}")))?;
        self.heartbeat.beat();

        let expected = match ftp.size(&self.target.path) {
            Ok(size) => Some(size as u64),
            Err(e) => {
                tracing::warn!(
                    path = %self.target.path,
                    error = %e,
                    "server did not report file size, skipping integrity check"
                );
                None
            }
        };
        self.heartbeat.beat();
        let mut progress = ProgressReporter::new(&self.filename, expected, self.events.clone());

        let mut file = std::fs::File::create(&self.dest).map_err(TransferError::Storage)?;

        let mut reader = ftp
            .retr_as_stream(&self.target.path)
            .map_err(|e| TransferError::ProtocolError(format!("RETR failed: {e}")))?;
        match reader.get_ref().try_clone() {
            Ok(socket) => {
                socket_tx.send(socket).ok();
            }
            Err(e) => tracing::debug!(error = %e, "cannot hand data socket to stall breaker"),
        }

        self.heartbeat.beat();
        let mut buf = [0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        let read_error = loop {
            match reader.read(&mut buf) {
                Ok(0) => break None,
                Ok(n) => {
                    if let Err(e) = file.write_all(&buf[..n]) {
                        let _ = ftp.abort(reader);
                        let _ = ftp.quit();
                        return Err(TransferError::Storage(e));
                    }
                    written += n as u64;
                    self.heartbeat.beat();
                    progress.update(written);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => break Some(e),
            }
        };

        // A clean end of stream wins over a deadline that fired afterwards
        let forced_end = self.broken.load(Ordering::SeqCst);
        if forced_end || (read_error.is_some() && self.token.is_cancelled()) {
            tracing::warn!(path = %self.target.path, written, "ftp transfer stalled, aborting");
            if let Err(e) = ftp.abort(reader) {
                tracing::debug!(error = %e, "ABOR not acknowledged");
            }
            let _ = ftp.quit();
            return Err(TransferError::StallTimeout {
                idle: self.idle,
                bytes_received: written,
            });
        }

        if let Some(e) = read_error {
            let _ = ftp.abort(reader);
            let _ = ftp.quit();
            return Err(TransferError::ConnectionFailure(format!(
                "data connection failed after {written} bytes: {e}"
            )));
        }

        ftp.finalize_retr_stream(reader)
            .map_err(|e| TransferError::ProtocolError(format!("transfer not confirmed: {e}")))?;
        self.heartbeat.beat();
        file.flush().map_err(TransferError::Storage)?;
        drop(file);
        let _ = ftp.quit();

        verify_size(expected, written, self.tolerance)?;
        progress.finish(written);
        Ok(written)
    }
}
