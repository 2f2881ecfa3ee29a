use std::borrow::Cow;

use image::{imageops, GrayImage, RgbaImage};
use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{RemovalError, Result};

/// Tunables of the feathering stage.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatherParams {
    /// Gaussian standard deviation in source pixels. 0 disables the blur.
    pub blur_radius: f32,
    /// Falloff exponent applied to the inverted mask. Higher narrows the fringe.
    pub gamma: f32,
    /// Alpha values below this are snapped to 0.
    pub threshold: u8,
}

impl Default for FeatherParams {
    fn default() -> Self {
        Self {
            blur_radius: 2.0,
            gamma: 1.5,
            threshold: 10,
        }
    }
}

impl FeatherParams {
    pub fn validate(&self) -> Result<()> {
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return Err(RemovalError::Config(format!(
                "feather gamma must be a positive number, got {}",
                self.gamma
            )));
        }
        if !self.blur_radius.is_finite() || self.blur_radius < 0.0 {
            return Err(RemovalError::Config(format!(
                "feather blur_radius must be >= 0, got {}",
                self.blur_radius
            )));
        }
        Ok(())
    }
}

/// Per-pixel opacity at source resolution, 0 = transparent, 255 = opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphaMask {
    values: GrayImage,
}

impl AlphaMask {
    pub fn from_gray(values: GrayImage) -> Self {
        Self { values }
    }

    pub fn width(&self) -> u32 {
        self.values.width()
    }

    pub fn height(&self) -> u32 {
        self.values.height()
    }

    /// Returns (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.values.dimensions()
    }

    /// Row-major alpha values
    pub fn as_raw(&self) -> &[u8] {
        self.values.as_raw()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.values
    }
}

/// Lookup table from blurred mask value to alpha:
/// `round(255 * (1 - v/255)^gamma)`, thresholded.
pub fn alpha_curve(params: &FeatherParams) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (v, slot) in table.iter_mut().enumerate() {
        let m = v as f32 / 255.0;
        let alpha = (255.0 * (1.0 - m).powf(params.gamma)).round().clamp(0.0, 255.0) as u8;
        *slot = snap(alpha, params.threshold);
    }
    table
}

fn snap(alpha: u8, threshold: u8) -> u8 {
    if alpha < threshold {
        0
    } else {
        alpha
    }
}

/// Snap every alpha below `threshold` to 0. Idempotent.
pub fn apply_threshold(alpha: &mut AlphaMask, threshold: u8) {
    for value in alpha.values.iter_mut() {
        *value = snap(*value, threshold);
    }
}

/// Blur the resampled mask and shape it into an alpha channel.
///
/// Only the red channel of `resampled` is read; the resampler writes the
/// same value to R, G and B. Output is non-increasing in the mask value:
/// mask 0 maps to 255 (opaque) and mask 1 maps to 0.
pub fn feather(resampled: &RgbaImage, params: &FeatherParams) -> AlphaMask {
    let _span = tracing::debug_span!("feather").entered();

    let blurred = if params.blur_radius > 0.0 {
        Cow::Owned(imageops::blur(resampled, params.blur_radius))
    } else {
        Cow::Borrowed(resampled)
    };

    let curve = alpha_curve(params);
    let (width, height) = resampled.dimensions();
    let row_len = width as usize;
    let mut values = GrayImage::new(width, height);

    if row_len > 0 {
        values
            .par_chunks_mut(row_len)
            .zip(blurred.as_raw().par_chunks(row_len * 4))
            .for_each(|(alpha_row, mask_row)| {
                for (alpha, pixel) in alpha_row.iter_mut().zip(mask_row.chunks_exact(4)) {
                    *alpha = curve[pixel[0] as usize];
                }
            });
    }

    tracing::debug!(
        "Feathered {}x{} mask (blur={}, gamma={}, threshold={})",
        width,
        height,
        params.blur_radius,
        params.gamma,
        params.threshold
    );

    AlphaMask { values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matte::{resample, ResampleFilter};
    use crate::segmentation::Mask;
    use image::Rgba;

    fn gray(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn full_mask_is_transparent() {
        let params = FeatherParams {
            blur_radius: 0.0,
            gamma: 2.0,
            ..FeatherParams::default()
        };
        let alpha = feather(&gray(2, 2, 255), &params);
        assert!(alpha.as_raw().iter().all(|&a| a == 0));
    }

    #[test]
    fn empty_mask_is_opaque() {
        let alpha = feather(&gray(5, 4, 0), &FeatherParams::default());
        assert_eq!(alpha.dimensions(), (5, 4));
        assert!(alpha.as_raw().iter().all(|&a| a == 255));
    }

    #[test]
    fn every_pixel_is_written_for_odd_shapes() {
        // mask 0 -> alpha 255, so any pixel left untouched would show as 0
        for (width, height) in [(1, 1), (1, 7), (7, 1), (13, 5)] {
            let alpha = feather(&gray(width, height, 0), &FeatherParams::default());
            assert_eq!(alpha.dimensions(), (width, height));
            assert_eq!(alpha.as_raw().len(), (width * height) as usize);
            assert!(alpha.as_raw().iter().all(|&a| a == 255), "{width}x{height}");
        }
    }

    #[test]
    fn curve_is_non_increasing() {
        for gamma in [0.5, 1.0, 1.5, 2.0, 4.0] {
            let curve = alpha_curve(&FeatherParams {
                gamma,
                threshold: 0,
                ..FeatherParams::default()
            });
            assert_eq!(curve[0], 255);
            assert_eq!(curve[255], 0);
            assert!(curve.windows(2).all(|w| w[0] >= w[1]), "gamma {gamma}");
        }
    }

    #[test]
    fn curve_matches_formula() {
        let curve = alpha_curve(&FeatherParams {
            gamma: 2.0,
            threshold: 0,
            ..FeatherParams::default()
        });
        // (1 - 128/255)^2 * 255 = 63.25...
        assert_eq!(curve[128], 63);
    }

    #[test]
    fn higher_gamma_narrows_fringe() {
        let soft = alpha_curve(&FeatherParams {
            gamma: 1.0,
            threshold: 0,
            ..FeatherParams::default()
        });
        let sharp = alpha_curve(&FeatherParams {
            gamma: 3.0,
            threshold: 0,
            ..FeatherParams::default()
        });
        assert!((1..255).all(|v| sharp[v] <= soft[v]));
    }

    #[test]
    fn low_alpha_snaps_to_zero() {
        let params = FeatherParams {
            blur_radius: 0.0,
            gamma: 1.0,
            threshold: 10,
        };
        // 255 * (1 - 250/255) = 5 -> below threshold
        let alpha = feather(&gray(1, 1, 250), &params);
        assert_eq!(alpha.as_raw(), &[0]);
        // 255 * (1 - 240/255) = 15 -> kept
        let alpha = feather(&gray(1, 1, 240), &params);
        assert_eq!(alpha.as_raw(), &[15]);
    }

    #[test]
    fn thresholding_is_idempotent() {
        let mask = Mask::new(4, 1, vec![0.0, 0.3, 0.97, 1.0]).unwrap();
        let params = FeatherParams::default();
        let once = feather(&resample(&mask, 16, 4, ResampleFilter::Bilinear), &params);

        let mut twice = once.clone();
        apply_threshold(&mut twice, params.threshold);
        assert_eq!(once, twice);

        let again = feather(&resample(&mask, 16, 4, ResampleFilter::Bilinear), &params);
        assert_eq!(once, again);
        assert!(once.as_raw().iter().all(|&a| a == 0 || a >= params.threshold));
    }

    #[test]
    fn blur_softens_hard_edge() {
        let mut edge = gray(64, 1, 0);
        for x in 32..64 {
            edge.put_pixel(x, 0, Rgba([255, 255, 255, 255]));
        }
        let params = FeatherParams {
            blur_radius: 2.0,
            gamma: 1.0,
            threshold: 0,
        };
        let alpha = feather(&edge, &params);
        let middle = &alpha.as_raw()[16..48];
        assert!(middle.iter().any(|&a| a > 0 && a < 255));
        assert!(middle.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn validate_rejects_bad_params() {
        assert!(FeatherParams::default().validate().is_ok());
        assert!(FeatherParams {
            gamma: -1.0,
            ..FeatherParams::default()
        }
        .validate()
        .is_err());
        assert!(FeatherParams {
            blur_radius: f32::NAN,
            ..FeatherParams::default()
        }
        .validate()
        .is_err());
    }
}
