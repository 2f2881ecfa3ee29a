mod composite;
mod png;

pub use composite::{composite, CompositeOutput};
pub use png::{decode_png, encode_matte_png, encode_png, PngFile, Stdout};

use anyhow::Result;

/// Trait for output destinations
pub trait OutputSink {
    /// Write an already-encoded image
    fn write_image(&mut self, encoded: &[u8]) -> Result<()>;
}
