//! Typed errors for the scraping workspace.

use thiserror::Error;

/// Errors that are fatal to a run or a source.
///
/// Item-level failures never surface here; they travel on the item as
/// `_quality_issues` / `_validation_errors` and end up in `items_dropped`.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Config failed to parse or validate. A run never starts on this.
    #[error("config error: {0}")]
    Config(String),

    /// An engine could not be constructed. The source fails fast.
    #[error("engine error: {0}")]
    Engine(String),

    /// An artifact write failed in strict mode.
    #[error("persist error: {0}")]
    Persist(String),

    /// The run deadline passed or cancellation was requested.
    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
