//! Error types for talking to the observation source.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reaching the remote source or the local fallback.
///
/// These never escape [`crate::Fetcher::fetch`]; they are turned into a
/// fallback substitution plus a notice.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure, including timeouts.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("FHIR server returned HTTP {status}")]
    Status { status: u16 },

    /// The server answered, but not with a usable bundle.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The local fallback bundle is missing or malformed.
    #[error("fallback bundle {} is unusable: {message}", path.display())]
    FallbackUnreadable { path: PathBuf, message: String },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
