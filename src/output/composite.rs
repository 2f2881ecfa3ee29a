use image::RgbaImage;
use rayon::prelude::*;

use crate::matte::AlphaMask;
use crate::source::SourceImage;

/// Source colors with the feathered alpha applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeOutput {
    image: RgbaImage,
}

impl CompositeOutput {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// `round(a * m / 255)` in integer arithmetic.
fn scale_alpha(original: u8, mask: u8) -> u8 {
    let product = u32::from(original) * u32::from(mask);
    ((2 * product + 255) / 510) as u8
}

/// Multiply the source alpha by the alpha mask; RGB is copied unchanged.
///
/// # Panics
/// If `alpha` and `source` differ in dimensions. Both are derived from the
/// same source image inside the pipeline, so a mismatch is a caller bug.
pub fn composite(source: &SourceImage, alpha: &AlphaMask) -> CompositeOutput {
    let _span = tracing::debug_span!("composite").entered();

    assert_eq!(
        source.dimensions(),
        alpha.dimensions(),
        "alpha mask must match source dimensions"
    );

    let mut image = source.pixels().clone();
    let row_len = image.width() as usize;

    if row_len > 0 {
        image
            .par_chunks_mut(row_len * 4)
            .zip(alpha.as_raw().par_chunks(row_len))
            .for_each(|(pixel_row, alpha_row)| {
                for (pixel, &mask) in pixel_row.chunks_exact_mut(4).zip(alpha_row) {
                    pixel[3] = scale_alpha(pixel[3], mask);
                }
            });
    }

    CompositeOutput { image }
}
