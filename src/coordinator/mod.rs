//! Sequential dispatch of a batch of transfers
//!
//! The coordinator hands each task to the engine for its protocol, one after
//! another, collects one outcome per task, and writes a failure manifest when
//! anything failed. Individual failures never abort the batch.

mod manifest;

pub use manifest::{ManifestEntry, load_failure_manifest, write_manifest};

use crate::config::{BatchOrder, Config};
use crate::error::Result;
use crate::links::ExtractedLinks;
use crate::transfer::{FtpTransferEngine, HttpTransferEngine, TransferEngine};
use crate::types::{BatchReport, Event, Protocol, TransferTask};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// A unit of work before dispatch
enum Planned {
    Task(TransferTask),
    Invalid(String),
}

/// Runs batches of transfers and keeps the failure manifest
pub struct BatchDownloadCoordinator {
    config: Arc<Config>,
    http: Arc<dyn TransferEngine>,
    ftp: Arc<dyn TransferEngine>,
    event_tx: broadcast::Sender<Event>,
}

impl BatchDownloadCoordinator {
    /// Create a coordinator with the built-in HTTP and FTP engines
    ///
    /// Engine events are published on this coordinator's channel.
    ///
    /// # Errors
    /// [`crate::Error::Config`] for an invalid configuration,
    /// [`crate::Error::Network`] if the HTTP client cannot be built.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(1000);
        let http = HttpTransferEngine::new(config.clone(), event_tx.clone())?;
        let ftp = FtpTransferEngine::new(config.clone(), event_tx.clone());

        Ok(Self {
            config,
            http: Arc::new(http),
            ftp: Arc::new(ftp),
            event_tx,
        })
    }

    /// Create a coordinator around caller-supplied engines
    ///
    /// Only batch-level events are published on this coordinator's channel;
    /// the engines publish wherever they were built to.
    pub fn with_engines(
        config: Arc<Config>,
        http: Arc<dyn TransferEngine>,
        ftp: Arc<dyn TransferEngine>,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(1000);
        Self {
            config,
            http,
            ftp,
            event_tx,
        }
    }

    /// Subscribe to transfer and batch events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Download `tasks` in order
    ///
    /// The manifest, if needed, goes into the destination directory of the
    /// first task.
    pub async fn run(&self, tasks: Vec<TransferTask>) -> BatchReport {
        let manifest_dir = tasks.first().map(|t| t.dest_dir().to_path_buf());
        let planned = tasks.into_iter().map(Planned::Task).collect();
        self.execute(planned, manifest_dir.as_deref()).await
    }

    /// Download every extracted link into `dest_dir`
    ///
    /// Protocol batches are dispatched in the configured [`BatchOrder`]. Links
    /// that cannot become tasks are counted as failures.
    pub async fn run_links(&self, links: &ExtractedLinks, dest_dir: &Path) -> BatchReport {
        let ordered: Vec<&String> = match self.config.download.batch_order {
            BatchOrder::HttpFirst => links.http.iter().chain(links.ftp.iter()).collect(),
            BatchOrder::FtpFirst => links.ftp.iter().chain(links.http.iter()).collect(),
        };

        if !links.http.is_empty() {
            info!(count = links.http.len(), "dispatching HTTP links");
        }
        if !links.ftp.is_empty() {
            info!(count = links.ftp.len(), "dispatching FTP links");
        }

        let planned = ordered
            .into_iter()
            .map(|link| match TransferTask::new(link, dest_dir) {
                Ok(task) => Planned::Task(task),
                Err(e) => {
                    warn!(link = %link, error = %e, "rejecting link");
                    Planned::Invalid(link.clone())
                }
            })
            .collect();

        self.execute(planned, Some(dest_dir)).await
    }

    /// Retry the downloads listed in `dest_dir`'s failure manifest
    ///
    /// Returns an empty report when there is no manifest. The manifest is
    /// rewritten with whatever still fails, or removed when everything
    /// succeeds.
    ///
    /// # Errors
    /// [`crate::Error::Io`] if an existing manifest cannot be read.
    pub async fn retry_failed(&self, dest_dir: &Path) -> Result<BatchReport> {
        let path = self.manifest_path(dest_dir);
        if !tokio::fs::try_exists(&path).await? {
            info!(path = %path.display(), "no failure manifest, nothing to retry");
            return Ok(BatchReport::default());
        }

        let entries = load_failure_manifest(&path).await?;
        info!(count = entries.len(), path = %path.display(), "retrying failed downloads");

        let planned = entries
            .into_iter()
            .map(|entry| match TransferTask::new(&entry.url, dest_dir) {
                Ok(task) => Planned::Task(task),
                Err(e) => {
                    warn!(link = %entry.url, error = %e, "rejecting manifest entry");
                    Planned::Invalid(entry.url)
                }
            })
            .collect();

        let report = self.execute(planned, Some(dest_dir)).await;
        if report.all_succeeded() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!(path = %path.display(), "all retries succeeded, manifest removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove manifest"),
            }
        }
        Ok(report)
    }

    fn manifest_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.config.download.failure_manifest)
    }

    fn engine_for(&self, protocol: Protocol) -> &dyn TransferEngine {
        match protocol {
            Protocol::Http => self.http.as_ref(),
            Protocol::Ftp => self.ftp.as_ref(),
        }
    }

    async fn execute(&self, planned: Vec<Planned>, manifest_dir: Option<&Path>) -> BatchReport {
        let total = planned.len();
        let mut report = BatchReport::default();
        let mut manifest = Vec::new();

        for (i, item) in planned.into_iter().enumerate() {
            match item {
                Planned::Task(task) => {
                    info!(
                        index = i + 1,
                        total,
                        protocol = %task.protocol(),
                        url = task.url(),
                        "downloading"
                    );
                    let outcome = self
                        .engine_for(task.protocol())
                        .download(&task, &self.config.retry)
                        .await;
                    if !outcome.success {
                        manifest.push(ManifestEntry::new(task.filename(), task.url()));
                    }
                    report.record(outcome);
                }
                Planned::Invalid(link) => {
                    manifest.push(ManifestEntry::new(link_name(&link), link.clone()));
                    report.record_invalid(link);
                }
            }
        }

        if !manifest.is_empty()
            && let Some(dir) = manifest_dir
        {
            let path = self.manifest_path(dir);
            match write_manifest(&path, &manifest).await {
                Ok(()) => {
                    info!(path = %path.display(), entries = manifest.len(), "failure manifest written");
                    report.manifest_path = Some(path);
                }
                Err(e) => error!(path = %path.display(), error = %e, "failed to write failure manifest"),
            }
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "batch complete"
        );
        if report.failed > 0 {
            error!(failed = report.failed, "some files could not be downloaded");
        }
        self.event_tx
            .send(Event::BatchComplete {
                total: report.total,
                succeeded: report.succeeded,
                failed: report.failed,
            })
            .ok();

        report
    }
}

impl std::fmt::Debug for BatchDownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDownloadCoordinator")
            .field("batch_order", &self.config.download.batch_order)
            .field("failure_manifest", &self.config.download.failure_manifest)
            .finish()
    }
}

/// Best-effort file name for a link that never became a task
fn link_name(link: &str) -> &str {
    let without_query = link.split('?').next().unwrap_or(link);
    without_query.rsplit('/').next().unwrap_or(without_query)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::FailureKind;
    use crate::types::TransferOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Engine that fails any URL containing "bad" and records dispatch order
    struct ScriptedEngine {
        protocol: Protocol,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TransferEngine for ScriptedEngine {
        fn protocol(&self) -> Protocol {
            self.protocol
        }

        async fn download(&self, task: &TransferTask, policy: &RetryPolicy) -> TransferOutcome {
            self.seen.lock().unwrap().push(task.url().to_string());
            if task.url().contains("bad") {
                TransferOutcome::failed(
                    task.clone(),
                    policy.max_attempts,
                    FailureKind::ConnectionFailure,
                    "refused",
                )
            } else {
                TransferOutcome::succeeded(task.clone(), 1, 1)
            }
        }
    }

    fn coordinator(config: Config) -> (BatchDownloadCoordinator, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let http = Arc::new(ScriptedEngine {
            protocol: Protocol::Http,
            seen: seen.clone(),
        });
        let ftp = Arc::new(ScriptedEngine {
            protocol: Protocol::Ftp,
            seen: seen.clone(),
        });
        (
            BatchDownloadCoordinator::with_engines(Arc::new(config), http, ftp),
            seen,
        )
    }

    fn links() -> ExtractedLinks {
        ExtractedLinks {
            http: vec!["http://h/1.HDF".into(), "http://h/bad2.HDF".into()],
            ftp: vec!["ftp://h/3.HDF".into()],
        }
    }

    #[tokio::test]
    async fn http_batch_goes_first_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, seen) = coordinator(Config::default());

        let report = coordinator.run_links(&links(), dir.path()).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["http://h/1.HDF", "http://h/bad2.HDF", "ftp://h/3.HDF"]
        );
        assert_eq!((report.total, report.succeeded, report.failed), (3, 2, 1));
        assert_eq!(report.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn ftp_first_order_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.download.batch_order = BatchOrder::FtpFirst;
        let (coordinator, seen) = coordinator(config);

        coordinator.run_links(&links(), dir.path()).await;
        assert_eq!(seen.lock().unwrap()[0], "ftp://h/3.HDF");
    }

    #[tokio::test]
    async fn manifest_lists_only_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(Config::default());

        let report = coordinator.run_links(&links(), dir.path()).await;

        let path = dir.path().join("failed_downloads.txt");
        assert_eq!(report.manifest_path.as_deref(), Some(path.as_path()));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "bad2.HDF\nhttp://h/bad2.HDF\n"
        );
    }

    #[tokio::test]
    async fn clean_batch_writes_no_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(Config::default());
        let task = TransferTask::new("http://h/ok.HDF", dir.path()).unwrap();

        let report = coordinator.run(vec![task]).await;
        assert!(report.all_succeeded());
        assert!(report.manifest_path.is_none());
        assert!(!dir.path().join("failed_downloads.txt").exists());
    }

    #[tokio::test]
    async fn invalid_link_is_counted_not_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, seen) = coordinator(Config::default());
        let links = ExtractedLinks {
            http: vec!["http://[::1/broken.HDF".into()],
            ftp: vec![],
        };

        let report = coordinator.run_links(&links, dir.path()).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!((report.total, report.failed), (1, 1));
        assert_eq!(report.invalid_links, vec!["http://[::1/broken.HDF"]);
        assert!(report.manifest_path.is_some());
    }

    #[tokio::test]
    async fn retry_pass_removes_manifest_when_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_downloads.txt");
        std::fs::write(&path, "1.HDF\nhttp://h/1.HDF\n3.HDF\nftp://h/3.HDF\n").unwrap();
        let (coordinator, seen) = coordinator(Config::default());

        let report = coordinator.retry_failed(dir.path()).await.unwrap();
        assert_eq!((report.total, report.succeeded), (2, 2));
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn retry_pass_rewrites_manifest_with_remaining_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_downloads.txt");
        std::fs::write(&path, "1.HDF\nhttp://h/1.HDF\nbad.HDF\nhttp://h/bad.HDF\n").unwrap();
        let (coordinator, _) = coordinator(Config::default());

        let report = coordinator.retry_failed(dir.path()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "bad.HDF\nhttp://h/bad.HDF\n"
        );
    }

    #[tokio::test]
    async fn retry_without_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, seen) = coordinator(Config::default());
        let report = coordinator.retry_failed(dir.path()).await.unwrap();
        assert_eq!(report.total, 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn link_name_strips_query() {
        assert_eq!(link_name("http://h/a/B.HDF?x=1"), "B.HDF");
        assert_eq!(link_name("nonsense"), "nonsense");
    }

    #[tokio::test]
    async fn batch_complete_event_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(Config::default());
        let mut events = coordinator.subscribe();

        coordinator.run_links(&links(), dir.path()).await;

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            Event::BatchComplete {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        ));
    }
}
