//! Error Taxonomy
//!
//! One error type for the whole mosaic pipeline. Parse tolerance and
//! catalog resolution misses are deliberately absent: they are reported
//! as counts and warnings, never raised.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MosaicError>;

#[derive(Debug, Error)]
pub enum MosaicError {
    /// Working directories unusable or engine missing. Raised before any side effect.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("working directory {} is not writable", .0.display())]
    NotWritable(PathBuf),

    #[error("tiling engine failed (exit status {status:?}): {message}")]
    EngineFailure { status: Option<i32>, message: String },

    #[error("tiling engine timed out after {0:?}")]
    EngineTimeout(Duration),

    #[error("generation produced no result for image {image_id}: {reason}")]
    GenerationFailed { image_id: i64, reason: String },

    #[error("generation lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mosaic {0} not found")]
    MosaicNotFound(i64),

    #[error("catalog item {0} not found")]
    ItemNotFound(i64),

    #[error("mosaic {mosaic_id} belongs to order {attached_to}, not order {order_id}")]
    OrderMismatch { mosaic_id: i64, order_id: i64, attached_to: i64 },

    #[error("mosaic {0} has no composition")]
    CompositionMissing(i64),

    #[error("mosaic {0} has an empty layout")]
    EmptyLayout(i64),

    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl MosaicError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MosaicError::LockTimeout(_) | MosaicError::EngineTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MosaicError::LockTimeout(Duration::from_secs(1)).is_retryable());
        assert!(MosaicError::EngineTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!MosaicError::MosaicNotFound(3).is_retryable());
        assert!(!MosaicError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn test_display_mentions_context() {
        let err = MosaicError::EngineFailure { status: Some(2), message: "boom".into() };
        let text = err.to_string();
        assert!(text.contains("Some(2)"));
        assert!(text.contains("boom"));
    }
}
