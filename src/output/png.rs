use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};

use super::composite::CompositeOutput;
use super::OutputSink;
use crate::error::RemovalError;
use crate::matte::AlphaMask;

/// Encode the composite as an RGBA PNG. Lossless: every byte round-trips.
pub fn encode_png(output: &CompositeOutput) -> Result<Vec<u8>, RemovalError> {
    let _span = tracing::debug_span!("encode").entered();
    let image = output.image();
    encode(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgba8)
}

/// Encode an alpha mask as a grayscale PNG, for matte inspection.
pub fn encode_matte_png(alpha: &AlphaMask) -> Result<Vec<u8>, RemovalError> {
    let _span = tracing::debug_span!("encode_matte").entered();
    encode(alpha.as_raw(), alpha.width(), alpha.height(), ExtendedColorType::L8)
}

fn encode(
    raw: &[u8],
    width: u32,
    height: u32,
    color: ExtendedColorType,
) -> Result<Vec<u8>, RemovalError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(raw, width, height, color)
        .map_err(|e| RemovalError::Encoding(e.to_string()))?;
    Ok(bytes)
}

/// Decode PNG bytes back to RGBA.
pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage, RemovalError> {
    image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .map(|img| img.to_rgba8())
        .map_err(|e| RemovalError::Decode(e.to_string()))
}

/// Writes encoded images to a file on disk.
pub struct PngFile {
    path: PathBuf,
}

impl PngFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for PngFile {
    fn write_image(&mut self, encoded: &[u8]) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(encoded)
            .and_then(|_| writer.flush())
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::info!("Wrote {} bytes to {}", encoded.len(), self.path.display());
        Ok(())
    }
}

/// Writes encoded images to standard output, for piping.
pub struct Stdout;

impl OutputSink for Stdout {
    fn write_image(&mut self, encoded: &[u8]) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(encoded)
            .and_then(|_| out.flush())
            .context("Failed to write image to stdout")
    }
}
