//! Streaming HTTP(S) downloads with stall detection and size verification

use super::{CHUNK_SIZE, ProgressReporter, TransferEngine, drive_transfer, verify_size};
use crate::config::{Config, RetryPolicy};
use crate::error::{Result, TransferError};
use crate::types::{Event, Protocol, TransferOutcome, TransferTask};
use crate::watchdog::StallWatchdog;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

/// Characters of an error body kept for diagnostics
const BODY_SNIPPET_CHARS: usize = 500;

/// HTTP(S) transfer engine
///
/// Certificate verification is off by default. When the handshake still fails
/// and `http.tls_fallback` is set, the same attempt is repeated once with a
/// verifying client before it counts as failed.
pub struct HttpTransferEngine {
    config: Arc<Config>,
    client: Client,
    verified_client: Option<Client>,
    events: broadcast::Sender<Event>,
}

impl HttpTransferEngine {
    /// Build the engine and its HTTP clients
    ///
    /// # Errors
    /// [`crate::Error::Network`] if a client cannot be built (TLS backend
    /// initialization failure).
    pub fn new(config: Arc<Config>, events: broadcast::Sender<Event>) -> Result<Self> {
        let client = build_client(&config, config.http.accept_invalid_certs)?;
        let verified_client = if config.http.accept_invalid_certs && config.http.tls_fallback {
            Some(build_client(&config, false)?)
        } else {
            None
        };

        Ok(Self {
            config,
            client,
            verified_client,
            events,
        })
    }

    /// Download a single URL into `dest_dir`
    ///
    /// # Errors
    /// [`crate::Error::InvalidUrl`] when the URL cannot become a task; transfer
    /// failures are reported in the outcome.
    pub async fn download_url(
        &self,
        url: &str,
        dest_dir: impl Into<PathBuf>,
        policy: &RetryPolicy,
    ) -> Result<TransferOutcome> {
        let task = TransferTask::new(url, dest_dir)?;
        Ok(self.download(&task, policy).await)
    }

    async fn attempt(&self, task: &TransferTask, policy: &RetryPolicy) -> std::result::Result<u64, TransferError> {
        let watchdog = StallWatchdog::start(policy.idle_timeout);

        let response = match send(&self.client, task.url(), &watchdog).await? {
            Ok(response) => response,
            Err(e) if is_tls_failure(&e) => match &self.verified_client {
                Some(verified) => {
                    tracing::warn!(
                        url = task.url(),
                        error = %e,
                        "TLS handshake failed, retrying with certificate verification"
                    );
                    send(verified, task.url(), &watchdog)
                        .await?
                        .map_err(|e| TransferError::ConnectionFailure(e.to_string()))?
                }
                None => return Err(TransferError::ConnectionFailure(e.to_string())),
            },
            Err(e) => return Err(TransferError::ConnectionFailure(e.to_string())),
        };

        if response.status() != StatusCode::OK {
            return Err(status_error(response, &watchdog).await);
        }

        let declared = response.content_length();
        tracing::debug!(url = task.url(), declared_bytes = ?declared, "response received");

        let dest = task.dest_path();
        let written = stream_to_file(response, &dest, &watchdog, self.progress(task, declared)).await?;

        let on_disk = tokio::fs::metadata(&dest)
            .await
            .map_err(TransferError::Storage)?
            .len();
        if on_disk != written {
            tracing::warn!(written, on_disk, "byte count differs from file size on disk");
        }
        verify_size(declared, on_disk, policy.size_tolerance)?;

        Ok(on_disk)
    }

    fn progress(&self, task: &TransferTask, declared: Option<u64>) -> ProgressReporter {
        ProgressReporter::new(task.filename(), declared, self.events.clone())
    }
}

#[async_trait]
impl TransferEngine for HttpTransferEngine {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn download(&self, task: &TransferTask, policy: &RetryPolicy) -> TransferOutcome {
        drive_transfer(task, policy, &self.events, |_| self.attempt(task, policy)).await
    }
}

impl std::fmt::Debug for HttpTransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransferEngine")
            .field("user_agent", &self.config.http.user_agent)
            .field("tls_fallback", &self.verified_client.is_some())
            .finish()
    }
}

fn build_client(config: &Config, accept_invalid_certs: bool) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let client = Client::builder()
        .user_agent(config.http.user_agent.as_str())
        .default_headers(headers)
        .connect_timeout(config.retry.connect_timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?;
    Ok(client)
}

/// Send the request, giving up when the watchdog fires before headers arrive
///
/// The outer error is a stall; the inner result is the request's own outcome.
async fn send(
    client: &Client,
    url: &str,
    watchdog: &StallWatchdog,
) -> std::result::Result<std::result::Result<Response, reqwest::Error>, TransferError> {
    let token = watchdog.token();
    tokio::select! {
        result = client.get(url).send() => Ok(result),
        _ = token.cancelled() => Err(stall(watchdog, 0)),
    }
}

async fn status_error(response: Response, watchdog: &StallWatchdog) -> TransferError {
    let status = response.status();
    let token = watchdog.token();
    let body = tokio::select! {
        body = response.text() => body.unwrap_or_default(),
        _ = token.cancelled() => String::new(),
    };
    let snippet: String = body.chars().take(BODY_SNIPPET_CHARS).collect();

    tracing::warn!(%status, body = %snippet, "server returned non-200 status");
    TransferError::ProtocolError(format!("HTTP {status}: {snippet}"))
}

async fn stream_to_file(
    response: Response,
    dest: &Path,
    watchdog: &StallWatchdog,
    mut progress: ProgressReporter,
) -> std::result::Result<u64, TransferError> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(TransferError::Storage)?;
    let mut writer = tokio::io::BufWriter::with_capacity(CHUNK_SIZE, &mut file);

    let heartbeat = watchdog.heartbeat();
    let token = watchdog.token();
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    heartbeat.beat();
    loop {
        tokio::select! {
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    writer.write_all(&bytes).await.map_err(TransferError::Storage)?;
                    written += bytes.len() as u64;
                    heartbeat.beat();
                    progress.update(written);
                }
                Some(Err(e)) => {
                    return Err(TransferError::ConnectionFailure(format!(
                        "stream interrupted after {written} bytes: {e}"
                    )));
                }
                None => break,
            },
            _ = token.cancelled() => {
                // Dropping the stream closes the connection
                return Err(stall(watchdog, written));
            }
        }
    }

    writer.flush().await.map_err(TransferError::Storage)?;
    drop(writer);
    file.sync_all().await.map_err(TransferError::Storage)?;

    progress.finish(written);
    Ok(written)
}

fn stall(watchdog: &StallWatchdog, bytes_received: u64) -> TransferError {
    TransferError::StallTimeout {
        idle: watchdog.idle(),
        bytes_received,
    }
}

/// Whether an error (or anything in its source chain) is a TLS handshake or
/// certificate failure
pub(crate) fn is_tls_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    const MARKERS: [&str; 4] = ["certificate", "tls", "ssl", "handshake"];

    let mut current = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_ascii_lowercase();
        if MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}
