use image::{imageops, GrayImage, Luma, Rgba, RgbaImage};
use serde::Deserialize;

use crate::segmentation::Mask;

/// Interpolation used to bring a mask up to source resolution.
///
/// There is no nearest-neighbor variant; masks are usually coarser than the
/// source and would show blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleFilter {
    #[default]
    Bilinear,
    CatmullRom,
    Lanczos3,
}

impl ResampleFilter {
    fn filter_type(self) -> imageops::FilterType {
        match self {
            Self::Bilinear => imageops::FilterType::Triangle,
            Self::CatmullRom => imageops::FilterType::CatmullRom,
            Self::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

/// Rescale a mask to `width` x `height`.
///
/// Each mask value is scaled x255 and replicated across R, G and B with
/// alpha fixed at 255, so the result can go straight through 2-D image
/// filters.
pub fn resample(mask: &Mask, width: u32, height: u32, filter: ResampleFilter) -> RgbaImage {
    let _span = tracing::debug_span!("resample").entered();

    let (mask_width, mask_height) = (mask.width(), mask.height());
    let data = mask.data();
    let gray = GrayImage::from_fn(mask_width, mask_height, |x, y| {
        let idx = (y * mask_width + x) as usize;
        Luma([(data[idx] * 255.0).round().clamp(0.0, 255.0) as u8])
    });

    // If dimensions match, no resize needed
    let gray = if (mask_width, mask_height) == (width, height) {
        gray
    } else {
        tracing::debug!(
            "Resampling mask {}x{} -> {}x{} ({:?})",
            mask_width,
            mask_height,
            width,
            height,
            filter
        );
        imageops::resize(&gray, width, height, filter.filter_type())
    };

    RgbaImage::from_fn(width, height, |x, y| {
        let value = gray.get_pixel(x, y)[0];
        Rgba([value, value, value, 255])
    })
}
