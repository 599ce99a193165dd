//! Transfer engines and the pieces they share
//!
//! Each engine implements [`TransferEngine`] for one [`Protocol`]. The attempt
//! bookkeeping (destination directory, retry loop, partial-file cleanup, events,
//! final outcome) lives in [`drive_transfer`] so both engines behave the same way
//! around their protocol-specific attempt.

use crate::config::RetryPolicy;
use crate::error::TransferError;
use crate::retry::resilient_transfer;
use crate::types::{Event, Protocol, TransferOutcome, TransferTask};
use crate::utils::remove_partial;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::broadcast;

/// FTP engine
pub mod ftp;
/// HTTP(S) engine
pub mod http;

pub use ftp::FtpTransferEngine;
pub use http::HttpTransferEngine;

/// Size of the read buffer used by both engines
pub(crate) const CHUNK_SIZE: usize = 8192;

/// A downloader for one protocol
///
/// Implementations never return an error: every failure is folded into the
/// returned [`TransferOutcome`].
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Protocol this engine serves
    fn protocol(&self) -> Protocol;

    /// Download `task`, retrying according to `policy`
    async fn download(&self, task: &TransferTask, policy: &RetryPolicy) -> TransferOutcome;
}

/// Check the written size against the size the server declared
///
/// An unknown (`None`) or zero declared size always passes.
pub fn verify_size(expected: Option<u64>, actual: u64, tolerance: u64) -> Result<(), TransferError> {
    match expected {
        Some(expected) if expected > 0 && expected.abs_diff(actual) > tolerance => {
            Err(TransferError::IntegrityMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

/// Run the attempts for `task` and turn the final result into an outcome
///
/// `attempt_fn` performs one protocol attempt and returns the bytes written.
/// Before each attempt the destination directory is created; after each failed
/// attempt the partial file is removed.
pub(crate) async fn drive_transfer<F, Fut>(
    task: &TransferTask,
    policy: &RetryPolicy,
    events: &broadcast::Sender<Event>,
    mut attempt_fn: F,
) -> TransferOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<u64, TransferError>>,
{
    let dest = task.dest_path();

    let retried = resilient_transfer(policy, task.filename(), |attempt| {
        tracing::info!(
            url = task.url(),
            filename = task.filename(),
            attempt,
            "starting transfer attempt"
        );
        emit(
            events,
            Event::AttemptStarted {
                url: task.url().to_string(),
                attempt,
            },
        );

        let transfer = attempt_fn(attempt);
        let dest = &dest;
        async move {
            tokio::fs::create_dir_all(task.dest_dir())
                .await
                .map_err(TransferError::Storage)?;

            match transfer.await {
                Ok(bytes) => Ok(bytes),
                Err(e) => {
                    remove_partial(dest).await;
                    emit(
                        events,
                        Event::AttemptFailed {
                            url: task.url().to_string(),
                            attempt,
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    );
                    Err(e)
                }
            }
        }
    })
    .await;

    match retried.result {
        Ok(bytes) => {
            tracing::info!(
                filename = task.filename(),
                path = %dest.display(),
                bytes,
                attempts = retried.attempts,
                "download complete"
            );
            emit(
                events,
                Event::TransferComplete {
                    url: task.url().to_string(),
                    path: dest,
                    bytes,
                },
            );
            TransferOutcome::succeeded(task.clone(), bytes, retried.attempts)
        }
        Err(e) => {
            tracing::error!(
                url = task.url(),
                attempts = retried.attempts,
                error = %e,
                "download failed"
            );
            emit(
                events,
                Event::TransferFailed {
                    url: task.url().to_string(),
                    attempts: retried.attempts,
                    kind: e.kind(),
                },
            );
            TransferOutcome::failed(task.clone(), retried.attempts, e.kind(), e.to_string())
        }
    }
}

/// Send an event, ignoring the case where nobody is subscribed
pub(crate) fn emit(events: &broadcast::Sender<Event>, event: Event) {
    events.send(event).ok();
}

/// Reports transfer progress in 5% steps, then a final 100%
pub(crate) struct ProgressReporter {
    filename: String,
    total: Option<u64>,
    last_reported: i64,
    events: broadcast::Sender<Event>,
}

impl ProgressReporter {
    const STEP: i64 = 5;

    pub(crate) fn new(filename: &str, total: Option<u64>, events: broadcast::Sender<Event>) -> Self {
        Self {
            filename: filename.to_string(),
            total: total.filter(|t| *t > 0),
            last_reported: -Self::STEP,
            events,
        }
    }

    /// Record the running byte count
    pub(crate) fn update(&mut self, bytes: u64) {
        let Some(total) = self.total else {
            return;
        };
        let percent = ((bytes.saturating_mul(100)) / total).min(100) as i64;
        if percent - self.last_reported >= Self::STEP {
            self.report(percent, bytes, total);
        }
    }

    /// Report 100% if the last step did not already
    pub(crate) fn finish(&mut self, bytes: u64) {
        match self.total {
            Some(total) if self.last_reported < 100 => self.report(100, bytes, total),
            Some(_) => {}
            None => tracing::debug!(filename = %self.filename, bytes, "transfer finished, size unknown"),
        }
    }

    fn report(&mut self, percent: i64, bytes: u64, total: u64) {
        self.last_reported = percent;
        tracing::info!(filename = %self.filename, percent, bytes, total, "download progress");
        emit(
            &self.events,
            Event::Progress {
                filename: self.filename.clone(),
                percent: percent as u8,
                bytes,
                total,
            },
        );
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::time::Duration;

    #[test]
    fn size_within_tolerance_passes() {
        assert!(verify_size(Some(1_000_000), 1_000_500, 1024).is_ok());
        assert!(verify_size(Some(1_000_000), 999_000, 1024).is_ok());
        assert!(verify_size(Some(1_000_000), 1_001_024, 1024).is_ok());
    }

    #[test]
    fn size_beyond_tolerance_fails() {
        let err = verify_size(Some(1_000_000), 998_000, 1024).unwrap_err();
        assert!(matches!(
            err,
            TransferError::IntegrityMismatch {
                expected: 1_000_000,
                actual: 998_000
            }
        ));
        assert!(verify_size(Some(1_000_000), 1_001_025, 1024).is_err());
    }

    #[test]
    fn unknown_or_zero_size_passes() {
        assert!(verify_size(None, 42, 1024).is_ok());
        assert!(verify_size(Some(0), 5_000_000, 1024).is_ok());
    }

    #[test]
    fn progress_reports_every_five_percent_and_final() {
        let (tx, mut rx) = broadcast::channel(100);
        let mut reporter = ProgressReporter::new("A.HDF", Some(1000), tx);

        for bytes in (0..=990).step_by(10) {
            reporter.update(bytes);
        }
        reporter.finish(1000);

        let mut percents = Vec::new();
        while let Ok(Event::Progress { percent, .. }) = rx.try_recv() {
            percents.push(percent);
        }
        let expected: Vec<u8> = (0..=100).step_by(5).collect();
        assert_eq!(percents, expected);
    }

    #[test]
    fn progress_without_total_is_silent() {
        let (tx, mut rx) = broadcast::channel(10);
        let mut reporter = ProgressReporter::new("A.HDF", None, tx);
        reporter.update(500);
        reporter.finish(500);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drive_transfer_cleans_up_after_each_failed_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let task = TransferTask::new("http://h/P.HDF", dir.path().join("nested")).unwrap();
        let policy = RetryPolicy {
            max_attempts: 2,
            retry_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let (tx, _rx) = broadcast::channel(16);
        let dest = task.dest_path();

        let outcome = drive_transfer(&task, &policy, &tx, |_| {
            let dest = dest.clone();
            async move {
                tokio::fs::write(&dest, b"partial").await.unwrap();
                Err(TransferError::ConnectionFailure("reset".into()))
            }
        })
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error, Some(FailureKind::ConnectionFailure));
        assert!(!dest.exists(), "partial file must not survive a failed attempt");
    }
}
