//! Extraction of product links from harvested text

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static HTTP_LINK: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"(?i)https?://[^\s"'<>]+\.HDF(?:\?[^\s"'<>]+)?"#).expect("static HTTP link pattern")
});

static FTP_LINK: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"(?i)ftp://(?:[^\s:@/]+:[^\s:@/]+@)?[^\s/"'<>]+/[^\s"'<>]+\.HDF"#)
        .expect("static FTP link pattern")
});

/// Product links found in a block of text, in source order
///
/// Duplicates are kept: a link listed twice is downloaded twice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLinks {
    /// `http://` and `https://` links
    pub http: Vec<String>,
    /// `ftp://` links, credentials included
    pub ftp: Vec<String>,
}

impl ExtractedLinks {
    /// True when the text contained no product links at all
    pub fn is_empty(&self) -> bool {
        self.http.is_empty() && self.ftp.is_empty()
    }

    /// Number of links across both protocols
    pub fn len(&self) -> usize {
        self.http.len() + self.ftp.len()
    }
}

/// Find every HTTP(S) and FTP product link in `raw_text`
///
/// Stateless; the same input always yields the same lists.
///
/// # Examples
///
/// ```
/// use satfetch::links::extract;
///
/// let links = extract("see http://portal.example/x/A.HDF and ftp://u:p@ftp.example/d/B.hdf");
/// assert_eq!(links.http, vec!["http://portal.example/x/A.HDF"]);
/// assert_eq!(links.ftp, vec!["ftp://u:p@ftp.example/d/B.hdf"]);
/// ```
pub fn extract(raw_text: &str) -> ExtractedLinks {
    let links = ExtractedLinks {
        http: HTTP_LINK
            .find_iter(raw_text)
            .map(|m| m.as_str().to_string())
            .collect(),
        ftp: FTP_LINK
            .find_iter(raw_text)
            .map(|m| m.as_str().to_string())
            .collect(),
    };
    tracing::debug!(http = links.http.len(), ftp = links.ftp.len(), "extracted product links");
    links
}
