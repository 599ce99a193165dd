//! Core types and events for satfetch

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Error, FailureKind, Result};
use crate::utils::{fallback_filename, filename_from_url};

/// Transfer protocol of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// `http://` and `https://` URLs
    Http,
    /// `ftp://` URLs
    Ftp,
}

impl Protocol {
    /// Protocol for a URL scheme, if supported
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(Protocol::Http),
            "ftp" => Some(Protocol::Ftp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Ftp => f.write_str("ftp"),
        }
    }
}

/// One file to fetch: where from, where to, and under which name
///
/// Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    url: String,
    protocol: Protocol,
    dest_dir: PathBuf,
    filename: String,
}

impl TransferTask {
    /// Create a task for `url`, saving into `dest_dir`
    ///
    /// # Errors
    /// [`Error::InvalidUrl`] when the URL does not parse or uses a scheme other
    /// than http, https or ftp.
    pub fn new(url: &str, dest_dir: impl Into<PathBuf>) -> Result<Self> {
        let parsed = Url::parse(url.trim()).map_err(|e| Error::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let protocol = Protocol::from_scheme(parsed.scheme()).ok_or_else(|| Error::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        })?;

        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(Error::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            });
        }

        let filename = filename_from_url(&parsed).unwrap_or_else(fallback_filename);

        Ok(Self {
            url: url.trim().to_string(),
            protocol,
            dest_dir: dest_dir.into(),
            filename,
        })
    }

    /// Source URL as supplied
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Protocol chosen from the URL scheme
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Destination directory
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Local file name
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full destination path (`dest_dir/filename`)
    pub fn dest_path(&self) -> PathBuf {
        self.dest_dir.join(&self.filename)
    }
}

/// Final result of one dispatched task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// The task this outcome belongs to
    pub task: TransferTask,
    /// Whether the file is on disk and passed the size check
    pub success: bool,
    /// Bytes written by the last attempt
    pub bytes_transferred: u64,
    /// Attempts made (at least 1 once dispatched)
    pub attempts: u32,
    /// Classification of the last failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureKind>,
    /// Message of the last failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TransferOutcome {
    /// Successful outcome
    pub fn succeeded(task: TransferTask, bytes_transferred: u64, attempts: u32) -> Self {
        Self {
            task,
            success: true,
            bytes_transferred,
            attempts,
            error: None,
            error_message: None,
        }
    }

    /// Failed outcome
    pub fn failed(
        task: TransferTask,
        attempts: u32,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task,
            success: false,
            bytes_transferred: 0,
            attempts,
            error: Some(kind),
            error_message: Some(message.into()),
        }
    }
}

/// Identifier of a browser window or tab
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub String);

impl WindowHandle {
    /// Create a handle from the browser's identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A text file the browser saved into the listen directory
///
/// The backing file stays on disk until [`FileDelivery::discard`] consumes the
/// delivery, so it can only be deleted once.
#[derive(Debug)]
pub struct FileDelivery {
    content: String,
    path: PathBuf,
}

impl FileDelivery {
    /// Wrap decoded file content and the file it came from
    pub fn new(content: String, path: PathBuf) -> Self {
        Self { content, path }
    }

    /// Decoded file content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the backing file and hand back the content
    ///
    /// A file that is already gone is not an error.
    pub async fn discard(self) -> Result<String> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "removed delivered file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        Ok(self.content)
    }
}

/// What a harvest produced
#[derive(Debug)]
pub enum HarvestResult {
    /// A text file appeared in the listen directory
    FileDelivery(FileDelivery),
    /// A new browser tab opened with the result listing
    PageDelivery {
        /// Plain-text body of the page
        text: String,
        /// The tab that was switched to
        handle: WindowHandle,
        /// URL of the tab
        url: String,
    },
}

impl HarvestResult {
    /// The delivered text, whichever channel it arrived on
    pub fn text(&self) -> &str {
        match self {
            HarvestResult::FileDelivery(file) => file.content(),
            HarvestResult::PageDelivery { text, .. } => text,
        }
    }
}

/// Aggregated result of a batch run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Tasks dispatched
    pub total: usize,
    /// Tasks that succeeded
    pub succeeded: usize,
    /// Tasks that failed after all attempts
    pub failed: usize,
    /// The failed tasks, in dispatch order
    pub failed_tasks: Vec<TransferTask>,
    /// Links that could not be turned into tasks (counted as failed)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalid_links: Vec<String>,
    /// One outcome per dispatched task, in dispatch order
    pub outcomes: Vec<TransferOutcome>,
    /// Failure manifest written for this batch, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
}

impl BatchReport {
    /// Record one outcome
    pub fn record(&mut self, outcome: TransferOutcome) {
        self.total += 1;
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.failed_tasks.push(outcome.task.clone());
        }
        self.outcomes.push(outcome);
    }

    /// Record a link that was rejected before dispatch
    pub fn record_invalid(&mut self, link: impl Into<String>) {
        self.total += 1;
        self.failed += 1;
        self.invalid_links.push(link.into());
    }

    /// True when nothing failed
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Event emitted during the transfer and harvest lifecycle
///
/// Events are informational; no behavior depends on anybody listening.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An attempt is about to start
    AttemptStarted {
        /// Source URL
        url: String,
        /// 1-based attempt number
        attempt: u32,
    },

    /// Transfer progress, emitted at 5% steps
    Progress {
        /// Local file name
        filename: String,
        /// Progress percentage (0 to 100)
        percent: u8,
        /// Bytes written so far
        bytes: u64,
        /// Declared total size
        total: u64,
    },

    /// An attempt failed
    AttemptFailed {
        /// Source URL
        url: String,
        /// 1-based attempt number
        attempt: u32,
        /// Failure classification
        kind: FailureKind,
        /// Failure message
        message: String,
    },

    /// A file was downloaded and verified
    TransferComplete {
        /// Source URL
        url: String,
        /// Final path on disk
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },

    /// A file could not be downloaded
    TransferFailed {
        /// Source URL
        url: String,
        /// Attempts made
        attempts: u32,
        /// Last failure classification
        kind: FailureKind,
    },

    /// A batch finished
    BatchComplete {
        /// Tasks dispatched
        total: usize,
        /// Tasks that succeeded
        succeeded: usize,
        /// Tasks that failed
        failed: usize,
    },

    /// A harvest produced a delivery
    HarvestDelivered {
        /// "file" or "page"
        channel: String,
    },

    /// A harvest saw no delivery before its deadline
    HarvestTimedOut {
        /// The directory that was watched
        listen_dir: PathBuf,
    },
}
