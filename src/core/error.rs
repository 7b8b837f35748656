//! Error types for linkrelay
//!
//! One error type covers every pipeline stage. Each variant knows whether it
//! is worth retrying, and failures shown to users go through [`excerpt`] so
//! internal detail stays bounded.

use std::time::Duration;
use thiserror::Error;

/// Maximum number of characters of an error message exposed to end users
pub const USER_EXCERPT_CHARS: usize = 200;

/// Main error type for linkrelay operations
#[derive(Debug, Error)]
pub enum Error {
    /// Every configured resolver endpoint was tried and none produced a link
    #[error("link could not be processed: all {attempts} resolver endpoints exhausted")]
    ResolutionFailed { share_url: String, attempts: usize },

    /// The download engine reported a failure (message is the engine's own)
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The download engine control channel rejected a call
    #[error("download engine error: {0}")]
    EngineRpc(String),

    /// Probing or segmenting the media file failed
    #[error("split failed: {0}")]
    SplitFailed(String),

    /// The messaging relay asked us to wait before trying again
    #[error("rate limited by relay, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The messaging relay refused the upload for good
    #[error("relay failed: {0}")]
    RelayFailed(String),

    /// No configured relay path accepts a file this large
    #[error("file of {size} bytes exceeds the relay ceiling of {ceiling} bytes")]
    TooLarge { size: u64, ceiling: u64 },

    /// Removing local artifacts failed (logged, never fatal)
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// HTTP-level failure (non-success status, bad body)
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network connectivity issues
    #[error("network error: {0}")]
    NetworkError(String),

    /// A bounded operation ran out of time
    #[error("timed out: {0}")]
    Timeout(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid configuration or parameters
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether a relay attempt failing with this error may be retried with backoff.
    ///
    /// Rate limits are not included: they carry their own authoritative wait.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(_) | Error::Timeout(_) | Error::HttpError(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Error::NetworkError(err.to_string())
        } else if err.is_decode() {
            Error::HttpError(format!("malformed response body: {err}"))
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::HttpError(format!("malformed JSON: {err}"))
    }
}

/// Truncates `text` to at most `max_chars` characters, marking the cut with an ellipsis
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Convenience result type for linkrelay operations
pub type Result<T> = std::result::Result<T, Error>;
