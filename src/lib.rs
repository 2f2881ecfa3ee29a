//! Background removal: turn a coarse segmentation mask into a feathered
//! alpha channel and composite it onto the source pixels.
//!
//! The segmentation model itself is an external capability behind
//! [`segmentation::EngineLoader`] and [`segmentation::SegmentationEngine`].
//! A [`session::Session`] initializes it once and shares it between
//! requests; [`pipeline::Remover`] runs the pixel stages for each request.

pub mod config;
pub mod error;
pub mod matte;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod segmentation;
pub mod session;
pub mod source;

pub use error::{ErrorKind, RemovalError, Result};
pub use pipeline::{Cutout, Remover, Stage};
pub use session::Session;
pub use source::SourceImage;
