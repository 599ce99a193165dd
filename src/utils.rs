//! Utility functions for file names and partial-file cleanup

use std::path::Path;
use url::Url;

/// Derive the local file name for a product URL
///
/// Takes the last path segment (the query string is never part of it),
/// percent-decodes it and rejects anything that could escape the destination
/// directory. Returns `None` when the URL has no usable final segment.
///
/// # Examples
///
/// ```
/// use satfetch::utils::filename_from_url;
/// use url::Url;
///
/// let url = Url::parse("http://portal.example/data/A2023.HDF?token=abc").unwrap();
/// assert_eq!(filename_from_url(&url).as_deref(), Some("A2023.HDF"));
/// ```
pub fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }

    let decoded = urlencoding::decode(last).ok()?.into_owned();
    let decoded = decoded.trim();
    if decoded.is_empty()
        || decoded == "."
        || decoded == ".."
        || decoded.contains('/')
        || decoded.contains('\\')
        || decoded.contains('\0')
    {
        return None;
    }

    Some(decoded.to_string())
}

/// Name used when a URL has no usable final segment: `download_<unix-seconds>.hdf`
pub fn fallback_filename() -> String {
    format!("download_{}.hdf", chrono::Utc::now().timestamp())
}

/// Delete a partially written file, logging instead of failing
///
/// A missing file is not an error: the attempt may have failed before the
/// file was created.
pub async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove partial file"
        ),
    }
}
