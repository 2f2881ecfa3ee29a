use image::{imageops, RgbaImage};
use ndarray::{Array4, ArrayViewD};

use super::types::{Mask, Segment};
use crate::error::{RemovalError, Result};

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting RGBA images to model input tensors
pub struct Preprocessor {
    input_size: u32,
}

impl Preprocessor {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    /// Preprocess an RGBA image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to the square model input
    /// 2. Scale to [0, 1] and apply ImageNet mean/std
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Alpha is ignored. Returns: Array4<f32> with shape [1, 3, size, size]
    pub fn preprocess(&self, image: &RgbaImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let size = self.input_size;
        let resized = if image.dimensions() != (size, size) {
            imageops::resize(image, size, size, imageops::FilterType::Lanczos3)
        } else {
            image.clone()
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
            }
        }

        tensor
    }

    /// Turn class logits into one binary segment per class present.
    ///
    /// # Arguments
    /// * `logits` - Model output with shape [1, C, H, W] or [C, H, W]
    /// * `labels` - Class names indexed by class id
    ///
    /// Masks stay at logit resolution. Segments are ordered by class id.
    pub fn logits_to_segments(logits: ArrayViewD<'_, f32>, labels: &[String]) -> Result<Vec<Segment>> {
        let _span = tracing::debug_span!("postprocess").entered();

        let shape = logits.shape();
        let (classes, height, width) = match *shape {
            [1, c, h, w] => (c, h, w),
            [c, h, w] => (c, h, w),
            _ => {
                return Err(RemovalError::InvalidSegmentationResult(format!(
                    "unexpected logits shape {shape:?}"
                )))
            }
        };
        if classes == 0 || height == 0 || width == 0 {
            return Err(RemovalError::InvalidSegmentationResult(format!(
                "empty logits shape {shape:?}"
            )));
        }

        let flat: Vec<f32> = logits.iter().copied().collect();
        let plane = height * width;

        // Argmax over classes
        let mut class_map = vec![0usize; plane];
        for (idx, winner) in class_map.iter_mut().enumerate() {
            let mut best = f32::NEG_INFINITY;
            for c in 0..classes {
                let value = flat[c * plane + idx];
                if value > best {
                    best = value;
                    *winner = c;
                }
            }
        }

        let mut present = vec![false; classes];
        for &c in &class_map {
            present[c] = true;
        }

        let mut segments = Vec::new();
        for (class, _) in present.iter().enumerate().filter(|(_, seen)| **seen) {
            let data = class_map
                .iter()
                .map(|&c| if c == class { 1.0 } else { 0.0 })
                .collect();
            let label = labels
                .get(class)
                .cloned()
                .unwrap_or_else(|| format!("class_{class}"));
            let mask = Mask::new(width as u32, height as u32, data)?;
            segments.push(Segment::new(label, mask));
        }

        tracing::debug!("{} of {} classes present", segments.len(), classes);
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use ndarray::Array3;

    fn labels() -> Vec<String> {
        vec!["background".into(), "hair".into(), "face".into()]
    }

    #[test]
    fn preprocess_produces_nchw_tensor() {
        let image = RgbaImage::from_pixel(7, 3, Rgba([255, 0, 128, 255]));
        let tensor = Preprocessor::new(4).preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);

        let red = (1.0 - MEAN[0]) / STD[0];
        assert!((tensor[[0, 0, 2, 2]] - red).abs() < 0.05);
    }

    #[test]
    fn argmax_emits_one_segment_per_present_class() {
        // 3 classes over a 1x2 plane: pixel 0 -> class 1, pixel 1 -> class 0
        let logits =
            Array3::from_shape_vec((3, 1, 2), vec![0.1, 0.9, 0.8, 0.2, 0.0, 0.0]).unwrap();
        let segments = Preprocessor::logits_to_segments(logits.view().into_dyn(), &labels()).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].label, "background");
        assert_eq!(segments[0].mask.data(), &[0.0, 1.0]);
        assert_eq!(segments[1].label, "hair");
        assert_eq!(segments[1].mask.data(), &[1.0, 0.0]);
        assert_eq!((segments[1].mask.width(), segments[1].mask.height()), (2, 1));
    }

    #[test]
    fn unknown_class_gets_placeholder_label() {
        let logits = Array3::from_shape_vec((4, 1, 1), vec![0.0, 0.0, 0.0, 5.0]).unwrap();
        let segments = Preprocessor::logits_to_segments(logits.view().into_dyn(), &labels()).unwrap();
        assert_eq!(segments[0].label, "class_3");
    }

    #[test]
    fn rejects_malformed_shape() {
        let logits = ndarray::Array2::<f32>::zeros((2, 2));
        let err = Preprocessor::logits_to_segments(logits.view().into_dyn(), &labels()).unwrap_err();
        assert!(matches!(err, RemovalError::InvalidSegmentationResult(_)));
    }
}
