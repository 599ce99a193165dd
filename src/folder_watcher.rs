//! Watching the browser's download directory for delivered link listings
//!
//! Browsers write a download to a temporary name (`.crdownload`, `.tmp`,
//! `.part`) and rename it when it completes. [`DeliveryWatcher`] follows those
//! temporaries through their renames and only reports a `.txt` file once no
//! temporary companion of it is still in flight.
//!
//! Only the listen directory itself is watched, not its subdirectories.

use crate::error::{Error, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reports completed `.txt` files appearing in one directory
///
/// The filesystem watch is removed when the watcher is dropped.
pub struct DeliveryWatcher {
    /// Filesystem watcher instance
    watcher: RecommendedWatcher,

    /// Channel for receiving filesystem events
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,

    /// Watched directory
    path: PathBuf,

    /// Extensions (without dot) marking in-progress downloads
    temp_extensions: Vec<String>,

    /// Temporaries seen but not yet renamed or removed
    pending_temps: HashSet<PathBuf>,

    /// Text files waiting for a companion temporary to finish
    deferred: Vec<PathBuf>,

    /// Completed text files not yet handed out
    ready: VecDeque<PathBuf>,

    /// Text files already reported or queued
    seen: HashSet<PathBuf>,
}

impl DeliveryWatcher {
    /// Start watching `path`, creating it if necessary
    ///
    /// # Errors
    /// [`Error::FolderWatch`] if the directory cannot be created or watched.
    pub fn new(path: &Path, temp_extensions: &[String]) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if let Err(e) = tx.send(res) {
                    error!("Failed to send filesystem event: {}", e);
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::FolderWatch(e.to_string()))?;

        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| {
                Error::FolderWatch(format!("Failed to create listen directory: {}", e))
            })?;
            info!("Created listen directory: {}", path.display());
        }

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| Error::FolderWatch(format!("Failed to watch folder: {}", e)))?;
        debug!("Watching for deliveries in {}", path.display());

        Ok(Self {
            watcher,
            rx,
            path: path.to_path_buf(),
            temp_extensions: temp_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            pending_temps: HashSet::new(),
            deferred: Vec::new(),
            ready: VecDeque::new(),
            seen: HashSet::new(),
        })
    }

    /// Wait for the next completed `.txt` file
    ///
    /// Returns `None` if the underlying watcher shut down. Safe to use inside
    /// `tokio::select!`: no event is lost when the future is dropped.
    pub async fn next_delivery(&mut self) -> Option<PathBuf> {
        loop {
            if let Some(path) = self.ready.pop_front() {
                return Some(path);
            }

            match self.rx.recv().await {
                Some(Ok(event)) => self.handle_event(event),
                Some(Err(e)) => warn!("Filesystem watcher error: {}", e),
                None => return None,
            }
        }
    }

    /// Temporaries currently in flight
    pub fn pending_temporaries(&self) -> usize {
        self.pending_temps.len()
    }

    /// Update tracking state from one filesystem event
    fn handle_event(&mut self, event: Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.appeared(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to, ..] = event.paths.as_slice() {
                    self.vanished(from);
                    self.appeared(to);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.vanished(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.appeared(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Platforms that do not say which side of the rename this is
                for path in &event.paths {
                    if path.exists() {
                        self.appeared(path);
                    } else {
                        self.vanished(path);
                    }
                }
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    if self.is_text_file(path) {
                        self.consider_text(path);
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.vanished(path);
                }
            }
            _ => {
                // Access and other events carry no delivery information
            }
        }
    }

    fn appeared(&mut self, path: &Path) {
        if self.is_temporary(path) {
            debug!("Download in progress: {}", path.display());
            self.pending_temps.insert(path.to_path_buf());
        } else if self.is_text_file(path) {
            self.consider_text(path);
        }
    }

    fn vanished(&mut self, path: &Path) {
        if self.pending_temps.remove(path) {
            debug!("Temporary download finished: {}", path.display());
            self.release_deferred();
        }
    }

    fn consider_text(&mut self, path: &Path) {
        if self.seen.contains(path) {
            return;
        }
        self.seen.insert(path.to_path_buf());

        if self.has_pending_companion(path) {
            debug!("Deferring {} until its download completes", path.display());
            self.deferred.push(path.to_path_buf());
        } else {
            info!("Delivery detected: {}", path.display());
            self.ready.push_back(path.to_path_buf());
        }
    }

    fn release_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for path in deferred {
            if self.has_pending_companion(&path) {
                self.deferred.push(path);
            } else {
                info!("Delivery detected: {}", path.display());
                self.ready.push_back(path);
            }
        }
    }

    /// A companion is `<name>.txt.<temp-ext>` for `<name>.txt`
    fn has_pending_companion(&self, text_path: &Path) -> bool {
        self.pending_temps
            .iter()
            .any(|temp| temp.with_extension("") == text_path)
    }

    fn is_text_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("txt"))
            .unwrap_or(false)
    }

    fn is_temporary(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.temp_extensions.iter().any(|t| *t == ext)
            })
            .unwrap_or(false)
    }
}

impl Drop for DeliveryWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.watcher.unwatch(&self.path) {
            debug!("Unwatch of {} failed: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for DeliveryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryWatcher")
            .field("path", &self.path)
            .field("pending_temps", &self.pending_temps)
            .field("ready", &self.ready)
            .finish()
    }
}
