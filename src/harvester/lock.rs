//! Single-flight lock on a listen directory

use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the lock file created inside the listen directory
pub const LOCK_FILE_NAME: &str = ".satfetch-harvest.lock";

/// Exclusive claim on a listen directory, released on drop
///
/// A lock file left behind by a crashed process keeps the directory busy
/// until it is removed by hand.
#[derive(Debug)]
pub struct HarvestLock {
    path: PathBuf,
}

impl HarvestLock {
    /// Claim `dir`, creating it if needed
    ///
    /// # Errors
    /// [`Error::HarvestBusy`] if another harvest holds the directory,
    /// [`Error::Io`] for any other filesystem failure.
    pub fn acquire(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::HarvestBusy {
                    path: dir.to_path_buf(),
                });
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            tracing::debug!(error = %e, "could not record owner in lock file");
        }

        Ok(Self { path })
    }
}

impl Drop for HarvestLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release harvest lock");
        }
    }
}
