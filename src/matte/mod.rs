//! Mask-to-alpha conversion: selection, resampling and feathering.
//!
//! Stages run in order and each consumes the previous stage's output:
//! `select_foreground` -> `resample` -> `feather`.

mod feather;
mod resample;
mod select;

pub use feather::{alpha_curve, apply_threshold, feather, AlphaMask, FeatherParams};
pub use resample::{resample, ResampleFilter};
pub use select::{select_foreground, ForegroundMask};
