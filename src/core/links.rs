//! Share-link validation and local file naming
//!
//! Only links on known share hosts are accepted. A mistyped host gets a
//! "did you mean" hint, found by fuzzy matching against the supported list.

use reqwest::Url;
use strsim::{jaro_winkler, normalized_levenshtein};

use crate::core::error::{Error, Result};

/// Hosts whose share links the resolver endpoints understand
pub const SUPPORTED_HOSTS: &[&str] = &[
    "terabox.com",
    "nephobox.com",
    "4funbox.com",
    "mirrobox.com",
    "momerybox.com",
    "teraboxapp.com",
    "1024tera.com",
    "terabox.app",
    "gibibox.com",
    "goaibox.com",
    "terasharelink.com",
    "teraboxlink.com",
    "terafileshare.com",
];

/// Minimum blended similarity for a host to be suggested
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Extracts the lowercase host of a share link
pub fn share_host(share_url: &str) -> Option<String> {
    let url = Url::parse(share_url.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str().map(|h| h.to_ascii_lowercase())
}

/// Whether `host` is a supported host or a subdomain of one
pub fn is_supported_host(host: &str) -> bool {
    SUPPORTED_HOSTS
        .iter()
        .any(|known| host == *known || host.ends_with(&format!(".{known}")))
}

/// Checks a share link before a job is created for it
pub fn validate_share_url(share_url: &str) -> Result<()> {
    let Some(host) = share_host(share_url) else {
        return Err(Error::InvalidInput(format!("'{share_url}' is not an http(s) link")));
    };

    if is_supported_host(&host) {
        return Ok(());
    }

    match suggest_host(&host) {
        Some(suggestion) => Err(Error::InvalidInput(format!(
            "unsupported host '{host}'. Did you mean '{suggestion}'?"
        ))),
        None => Err(Error::InvalidInput(format!("unsupported host '{host}'"))),
    }
}

/// Suggests the supported host closest to a mistyped one
pub fn suggest_host(host: &str) -> Option<&'static str> {
    let host = host.trim_start_matches("www.");
    if is_supported_host(host) {
        return None;
    }

    let mut best: Option<(&'static str, f64)> = None;
    for &candidate in SUPPORTED_HOSTS {
        // Levenshtein catches transpositions, Jaro-Winkler rewards a shared prefix
        let score = 0.6 * normalized_levenshtein(host, candidate) + 0.4 * jaro_winkler(host, candidate);
        if score >= SUGGESTION_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.map(|(candidate, _)| candidate)
}

/// Makes a resolver-supplied filename safe to use as a local path component
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')'))
        .map(|c| match c {
            ' ' => '_',
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "unknown_file".to_string()
    } else {
        cleaned
    }
}
