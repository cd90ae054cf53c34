use shop_core::EngineError;
use std::time::Duration;
use thiserror::Error;

/// Failure of a whole feed run. The live index is untouched whenever one of these is returned.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("feed exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("feed download timed out after {0:?}")]
    Timeout(Duration),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("index swap failed: {0}")]
    IndexSwap(String),

    #[error("unknown feed format: {0}")]
    UnknownFormat(String),

    #[error("invalid feed source: {0}")]
    InvalidSource(String),
}

impl FeedError {
    /// Download-class failures are retried with backoff; the rest wait for the next scheduled run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Download(_) | FeedError::TooLarge { .. } | FeedError::Timeout(_))
    }
}

impl From<EngineError> for FeedError {
    fn from(err: EngineError) -> Self {
        FeedError::IndexSwap(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Download(err.to_string())
    }
}

/// One rejected feed record. Collected per run, never fails the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {index}{}: {}", .id.as_deref().map(|id| format!(" ({id})")).unwrap_or_default(), .reasons.join("; "))]
pub struct ValidationError {
    /// Position of the record in the feed, zero based.
    pub index: usize,
    pub id: Option<String>,
    pub reasons: Vec<String>,
}
