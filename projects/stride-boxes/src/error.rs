//! Error types for the detection pipeline.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by the pipeline's public surface.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("a run is already in progress")]
    ConcurrentStartRejected,

    #[error("configuration cannot change while a run is in progress")]
    ConfigLocked,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("start() must be called from within a Tokio runtime")]
    NoRuntime,
}

/// Setup-time failures opening or probing a video source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no video track found in {0}")]
    NoVideoTrack(String),

    #[error("unreadable metadata: {0}")]
    UnreadableMetadata(String),

    #[error("unsupported source: {0}")]
    Unsupported(String),
}

/// Per-frame failures. These are absorbed by the run loop and never abort a run.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to decode frame at {timestamp:.3}s: {message}")]
    Decode { timestamp: f64, message: String },

    #[error("decoded frame at {timestamp:.3}s has no pixels")]
    EmptyImage { timestamp: f64 },

    #[error("detector failed: {0}")]
    Detect(String),

    #[error("detector did not answer within {0:?}")]
    DetectTimeout(Duration),

    #[error("detector worker is not running")]
    DetectorGone,
}

impl FrameError {
    pub fn decode(timestamp: f64, message: impl ToString) -> Self {
        FrameError::Decode {
            timestamp,
            message: message.to_string(),
        }
    }
}

/// Precondition violations in the letterbox transform.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("native frame size has a zero dimension")]
    DegenerateNativeSize,

    #[error("model input size has a zero dimension")]
    DegenerateModelSize,
}
