//! Canonical form of destination URLs.
//!
//! Two submissions that differ only in host case, an explicit default port or
//! a fragment map to the same stored URL, so they share one short code.

use url::Url;

/// Longest destination URL accepted, in bytes, after normalization.
pub const MAX_URL_LEN: usize = 2048;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UrlNormalizationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(String),

    #[error("Only HTTP and HTTPS URLs can be shortened")]
    UnsupportedProtocol,

    #[error("URL has no host")]
    MissingHost,

    #[error("URL is longer than {MAX_URL_LEN} bytes")]
    TooLong,
}

/// Normalizes a destination URL.
///
/// Keeps path and query byte-for-byte; lowercases the host, drops the default
/// port and the fragment. `javascript:`, `data:`, `file:` and other schemes
/// are rejected.
///
/// ```ignore
/// assert_eq!(
///     normalize_url("HTTPS://Example.COM:443/Docs#intro").unwrap(),
///     "https://example.com/Docs"
/// );
/// ```
pub fn normalize_url(input: &str) -> Result<String, UrlNormalizationError> {
    let mut url = Url::parse(input.trim())
        .map_err(|e| UrlNormalizationError::InvalidFormat(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlNormalizationError::UnsupportedProtocol);
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(UrlNormalizationError::MissingHost)?
        .to_ascii_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| UrlNormalizationError::InvalidFormat(e.to_string()))?;

    // Default ports are already dropped by the parser.
    url.set_fragment(None);

    let normalized = String::from(url);
    if normalized.len() > MAX_URL_LEN {
        return Err(UrlNormalizationError::TooLong);
    }
    Ok(normalized)
}
