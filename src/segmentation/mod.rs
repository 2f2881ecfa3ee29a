mod preprocess;
mod segformer;
pub mod types;

pub use preprocess::Preprocessor;
pub use segformer::{Segformer, SegformerLoader, DEFAULT_LABELS};
pub use types::{EngineLoader, Mask, Segment, SegmentationEngine, BACKGROUND_LABEL};
