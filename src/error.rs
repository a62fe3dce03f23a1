//! Error taxonomy for the scan pipeline
//!
//! Only `DecodeError` and `PreprocessError` ever fail an item. Detector and
//! aggregation problems degrade the record instead of failing it.

use thiserror::Error;

use crate::types::Stage;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unrecognized or corrupt image: {0}")]
    Image(#[from] image::ImageError),

    #[error("decoded image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("chart region has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

/// Soft failure of a single detector
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("surface too small for {detector}: {width}x{height}")]
    SurfaceTooSmall {
        detector: &'static str,
        width: u32,
        height: u32,
    },

    #[error("detector {0} panicked")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// An item that could not be analyzed, tagged with the stage that failed
#[derive(Debug, Error)]
#[error("{stage} failed: {reason}")]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

impl StageFailure {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

impl From<DecodeError> for StageFailure {
    fn from(e: DecodeError) -> Self {
        StageFailure::new(Stage::Decoding, e.to_string())
    }
}

impl From<PreprocessError> for StageFailure {
    fn from(e: PreprocessError) -> Self {
        StageFailure::new(Stage::Preprocessing, e.to_string())
    }
}

/// Failure reported by a capture collaborator
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture timed out after {0}ms")]
    Timeout(u64),

    #[error("capture returned an empty image")]
    EmptyImage,

    #[error("capture failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The consumer side of the queue is gone
#[derive(Debug, Error)]
#[error("scan queue is closed")]
pub struct QueueClosed;
