use image::RgbaImage;

use crate::error::{RemovalError, Result};

/// Decoded input image: straight (non-premultiplied) RGBA, row-major.
///
/// Immutable once loaded. Nothing in the pipeline writes back into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pixels: RgbaImage,
}

impl SourceImage {
    /// Decode any raster format the `image` crate recognizes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let _span = tracing::debug_span!("decode").entered();

        let decoded =
            image::load_from_memory(bytes).map_err(|e| RemovalError::Decode(e.to_string()))?;
        let pixels = decoded.to_rgba8();

        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(RemovalError::Decode("image has no pixels".into()));
        }

        tracing::debug!("Decoded {}x{} source image", pixels.width(), pixels.height());
        Ok(Self { pixels })
    }

    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Returns (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}
