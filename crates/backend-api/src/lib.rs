/// Typed REST client for the studio backend service
///
/// The backend owns all generation and analysis work (character images,
/// storyboard first frames, scene videos, virtual video cut). This crate
/// only speaks its wire contract: JSON endpoints under `{base}/api`, error
/// bodies of the form `{ "error": "..." }`, and loosely-typed job status
/// strings that are normalized to closed enums at this boundary.
use thiserror::Error;

mod types;
pub use types::*;

mod client;
pub use client::StudioClient;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;

impl BackendError {
    /// True for failures worth retrying on the next poll interval
    /// (connection resets, timeouts) as opposed to explicit rejections.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}
