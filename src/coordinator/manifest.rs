//! The failure manifest: two lines per failed file, name then link

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One failed download recorded in the manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Local file name the download would have used
    pub filename: String,
    /// Source link
    pub url: String,
}

impl ManifestEntry {
    /// Create an entry
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
        }
    }
}

/// Write `entries` to `path`, replacing any previous manifest
pub async fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> std::io::Result<()> {
    let mut body = String::new();
    for entry in entries {
        body.push_str(&entry.filename);
        body.push('\n');
        body.push_str(&entry.url);
        body.push('\n');
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await
}

/// Read a manifest written by a previous batch
///
/// Blank lines are ignored. A trailing name without a link is skipped with a
/// warning.
///
/// # Errors
/// [`crate::Error::Io`] if the file cannot be read.
pub async fn load_failure_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());

    let mut entries = Vec::new();
    while let Some(filename) = lines.next() {
        match lines.next() {
            Some(url) => entries.push(ManifestEntry::new(filename, url)),
            None => tracing::warn!(
                path = %path.display(),
                filename,
                "manifest entry has no link, skipping"
            ),
        }
    }
    Ok(entries)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn written_manifest_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_downloads.txt");
        let entries = vec![
            ManifestEntry::new("A.HDF", "http://h/A.HDF?t=1"),
            ManifestEntry::new("B.HDF", "ftp://u:p@h/B.HDF"),
        ];

        write_manifest(&path, &entries).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "A.HDF\nhttp://h/A.HDF?t=1\nB.HDF\nftp://u:p@h/B.HDF\n");

        assert_eq!(load_failure_manifest(&path).await.unwrap(), entries);
    }

    #[tokio::test]
    async fn dangling_name_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_downloads.txt");
        std::fs::write(&path, "A.HDF\nhttp://h/A.HDF\n\nB.HDF\n").unwrap();

        let entries = load_failure_manifest(&path).await.unwrap();
        assert_eq!(entries, vec![ManifestEntry::new("A.HDF", "http://h/A.HDF")]);
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_failure_manifest(&dir.path().join("nope.txt")).await.is_err());
    }
}
