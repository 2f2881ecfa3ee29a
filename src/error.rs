//! Error taxonomy for the background removal pipeline.
//!
//! Each stage surfaces its own variant and never retries locally. Errors are
//! `Clone` so one failed model initialization can be handed to every caller
//! that was waiting on it.

use thiserror::Error;

/// Errors returned by the session, the pixel stages and the encoder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemovalError {
    /// The segmentation engine could not be initialized.
    #[error("model initialization failed: {0}")]
    ModelInit(String),

    /// The inference call itself failed.
    #[error("segmentation failed: {0}")]
    Segmentation(String),

    /// The engine returned a segment whose shape invariants do not hold.
    #[error("invalid segmentation result: {0}")]
    InvalidSegmentationResult(String),

    /// Every segment was labelled background, or there were none.
    #[error("no foreground segment in segmentation result")]
    NoForeground,

    /// The input bytes are not a decodable raster image.
    #[error("failed to decode input image: {0}")]
    Decode(String),

    /// Lossless serialization of the composite failed.
    #[error("failed to encode output image: {0}")]
    Encoding(String),

    /// Settings could not be read or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A worker thread running a pixel stage was cancelled before finishing.
    #[error("pipeline stage interrupted: {0}")]
    Interrupted(String),
}

/// Fieldless discriminant of [`RemovalError`], carried by `Stage::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ModelInit,
    Segmentation,
    InvalidSegmentationResult,
    NoForeground,
    Decode,
    Encoding,
    Config,
    Interrupted,
}

impl RemovalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModelInit(_) => ErrorKind::ModelInit,
            Self::Segmentation(_) => ErrorKind::Segmentation,
            Self::InvalidSegmentationResult(_) => ErrorKind::InvalidSegmentationResult,
            Self::NoForeground => ErrorKind::NoForeground,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Config(_) => ErrorKind::Config,
            Self::Interrupted(_) => ErrorKind::Interrupted,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = RemovalError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(RemovalError::NoForeground.kind(), ErrorKind::NoForeground);
        assert_eq!(
            RemovalError::ModelInit("offline".into()).kind(),
            ErrorKind::ModelInit
        );
        assert_eq!(
            RemovalError::Encoding("disk full".into()).kind(),
            ErrorKind::Encoding
        );
        assert_eq!(
            RemovalError::Interrupted("runtime shutting down".into()).kind(),
            ErrorKind::Interrupted
        );
    }

    #[test]
    fn messages_carry_detail() {
        let err = RemovalError::InvalidSegmentationResult("mask 4x4 has 3 values".into());
        assert!(err.to_string().contains("mask 4x4 has 3 values"));
    }
}
