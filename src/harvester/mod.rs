//! Harvesting the result listing of an order
//!
//! After the browser is told to fetch an order's results, the listing shows up
//! on one of two channels: the browser saves a `.txt` file into the listen
//! directory, or it opens a new tab showing the listing. [`ResultHarvester`]
//! waits on both at once and returns whichever arrives first.
//!
//! ```no_run
//! # use satfetch::harvester::{BrowserSession, ResultHarvester};
//! # use satfetch::{Config, HarvestResult};
//! # use std::sync::Arc;
//! # async fn example(browser: &mut dyn BrowserSession) -> satfetch::Result<()> {
//! let harvester = ResultHarvester::new(Arc::new(Config::default()));
//! match harvester.harvest(browser, "20230915001").await? {
//!     Some(HarvestResult::FileDelivery(file)) => println!("{}", file.content()),
//!     Some(HarvestResult::PageDelivery { url, .. }) => println!("listing at {url}"),
//!     None => println!("nothing delivered"),
//! }
//! # Ok(())
//! # }
//! ```

mod browser;
mod encoding;
mod lock;

pub use browser::BrowserSession;
pub use encoding::decode_text;
pub use lock::{HarvestLock, LOCK_FILE_NAME};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::folder_watcher::DeliveryWatcher;
use crate::types::{Event, FileDelivery, HarvestResult, WindowHandle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Waits for an order's result listing on the filesystem and in the browser
pub struct ResultHarvester {
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
}

impl ResultHarvester {
    /// Create a harvester using `config.harvest`
    pub fn new(config: Arc<Config>) -> Self {
        let (event_tx, _rx) = broadcast::channel(1000);
        Self { config, event_tx }
    }

    /// Subscribe to harvest events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Harvest using the configured listen directory and timeout
    ///
    /// # Errors
    /// See [`ResultHarvester::harvest_with`].
    pub async fn harvest<B>(&self, browser: &mut B, target: &str) -> Result<Option<HarvestResult>>
    where
        B: BrowserSession + ?Sized,
    {
        let listen_dir = self.config.harvest.listen_dir.clone();
        let timeout = self.config.harvest.timeout;
        self.harvest_with(browser, target, &listen_dir, timeout).await
    }

    /// Trigger `target` in the browser and wait up to `timeout` for a delivery
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    ///
    /// # Errors
    /// - [`Error::HarvestBusy`] if another harvest is watching `listen_path`
    /// - [`Error::FolderWatch`] if the directory cannot be watched
    /// - [`Error::Browser`] if a browser call fails
    /// - [`Error::Io`] if the delivered file cannot be read
    pub async fn harvest_with<B>(
        &self,
        browser: &mut B,
        target: &str,
        listen_path: &Path,
        timeout: Duration,
    ) -> Result<Option<HarvestResult>>
    where
        B: BrowserSession + ?Sized,
    {
        let _lock = HarvestLock::acquire(listen_path)?;
        let mut watcher = DeliveryWatcher::new(listen_path, &self.config.harvest.temp_extensions)?;

        let known: HashSet<WindowHandle> =
            browser.current_window_handles().await?.into_iter().collect();
        debug!(order = target, windows = known.len(), "triggering result delivery");
        browser.trigger_action(target).await?;

        let deadline = Instant::now() + timeout;
        let mut poll = tokio::time::interval(self.config.harvest.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                delivered = watcher.next_delivery() => {
                    let path = delivered.ok_or_else(|| {
                        Error::FolderWatch("filesystem watcher stopped".to_string())
                    })?;
                    return self.resolve_file(path).await.map(Some);
                }
                _ = poll.tick() => {
                    let handles = browser.current_window_handles().await?;
                    if let Some(handle) = handles.into_iter().find(|h| !known.contains(h)) {
                        return self.resolve_page(browser, handle).await.map(Some);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        order = target,
                        listen_dir = %listen_path.display(),
                        timeout_secs = timeout.as_secs_f64(),
                        "no delivery before timeout"
                    );
                    self.emit(Event::HarvestTimedOut {
                        listen_dir: listen_path.to_path_buf(),
                    });
                    return Ok(None);
                }
            }
        }
    }

    async fn resolve_file(&self, path: PathBuf) -> Result<HarvestResult> {
        // Give the browser a moment to finish flushing
        tokio::time::sleep(self.config.harvest.file_settle).await;

        let bytes = tokio::fs::read(&path).await?;
        let (content, encoding) = decode_text(&bytes);
        info!(
            path = %path.display(),
            encoding,
            bytes = bytes.len(),
            "harvested result file"
        );

        self.emit(Event::HarvestDelivered {
            channel: "file".to_string(),
        });
        Ok(HarvestResult::FileDelivery(FileDelivery::new(content, path)))
    }

    async fn resolve_page<B>(&self, browser: &mut B, handle: WindowHandle) -> Result<HarvestResult>
    where
        B: BrowserSession + ?Sized,
    {
        browser.switch_to_window(&handle).await?;
        let text = browser.read_active_tab_plain_text().await?;
        let url = browser.current_url().await?;
        info!(%handle, url = %url, chars = text.len(), "harvested result page");

        self.emit(Event::HarvestDelivered {
            channel: "page".to_string(),
        });
        Ok(HarvestResult::PageDelivery { text, handle, url })
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

impl std::fmt::Debug for ResultHarvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHarvester")
            .field("listen_dir", &self.config.harvest.listen_dir)
            .field("timeout", &self.config.harvest.timeout)
            .finish()
    }
}
