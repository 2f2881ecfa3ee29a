use std::future::Future;

use crate::error::{RemovalError, Result};
use crate::progress::ProgressSink;
use crate::source::SourceImage;

/// Label reserved for the background class
pub const BACKGROUND_LABEL: &str = "background";

/// Single-channel confidence buffer with its own resolution.
///
/// Values are normalized to [0, 1], flattened in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Mask {
    /// Validate and wrap a raw engine buffer.
    ///
    /// Fails with `InvalidSegmentationResult` when the buffer length does not
    /// equal width x height, when either dimension is zero, or when a value
    /// falls outside [0, 1].
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RemovalError::InvalidSegmentationResult(format!(
                "mask has empty dimensions {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(RemovalError::InvalidSegmentationResult(format!(
                "mask {width}x{height} carries {} values, expected {expected}",
                data.len()
            )));
        }
        if let Some(bad) = data.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(RemovalError::InvalidSegmentationResult(format!(
                "mask value {bad} outside [0, 1]"
            )));
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Mask filled with a single value.
    pub fn filled(width: u32, height: u32, value: f32) -> Result<Self> {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Area used for foreground selection: buffer width x height.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Labelled region candidate from one inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub label: String,
    pub mask: Mask,
}

impl Segment {
    pub fn new(label: impl Into<String>, mask: Mask) -> Self {
        Self {
            label: label.into(),
            mask,
        }
    }

    pub fn is_background(&self) -> bool {
        self.label == BACKGROUND_LABEL
    }
}

/// A ready inference engine.
///
/// Maps one image to zero or more labelled segments. Ordering of the
/// returned list carries no meaning beyond tie-breaking in selection.
pub trait SegmentationEngine: Send + Sync {
    fn segment(&self, image: &SourceImage) -> impl Future<Output = Result<Vec<Segment>>> + Send;
}

/// Produces a [`SegmentationEngine`], reporting (stage, percent) events.
///
/// Implementations should surface their failures as `ModelInit`.
pub trait EngineLoader: Send + Sync {
    type Engine: SegmentationEngine;

    fn load(
        &self,
        progress: &dyn ProgressSink,
    ) -> impl Future<Output = Result<Self::Engine>> + Send;
}
