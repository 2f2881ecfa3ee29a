use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use ndarray::{Array4, ArrayD};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;

use super::preprocess::Preprocessor;
use super::types::{EngineLoader, Segment, SegmentationEngine, BACKGROUND_LABEL};
use crate::config::ModelSettings;
use crate::error::{RemovalError, Result};
use crate::progress::ProgressSink;
use crate::source::SourceImage;

/// Class names of the clothes-parsing SegFormer checkpoint.
///
/// Index 0 is the reserved background label.
pub const DEFAULT_LABELS: [&str; 18] = [
    BACKGROUND_LABEL,
    "Hat",
    "Hair",
    "Sunglasses",
    "Upper-clothes",
    "Skirt",
    "Pants",
    "Dress",
    "Belt",
    "Left-shoe",
    "Right-shoe",
    "Face",
    "Left-leg",
    "Right-leg",
    "Left-arm",
    "Right-arm",
    "Bag",
    "Scarf",
];

/// Loads a SegFormer ONNX export from a local file
#[derive(Debug)]
pub struct SegformerLoader {
    model_path: PathBuf,
    input_size: u32,
    intra_threads: usize,
    labels: Vec<String>,
}

impl SegformerLoader {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let model_path = settings
            .path
            .clone()
            .ok_or_else(|| RemovalError::Config("no model path configured".into()))?;

        let labels = match &settings.labels {
            Some(labels) => labels.clone(),
            None => DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
        };

        Ok(Self {
            model_path,
            input_size: settings.input_size,
            intra_threads: settings.intra_threads,
            labels,
        })
    }
}

impl EngineLoader for SegformerLoader {
    type Engine = Segformer;

    async fn load(&self, progress: &dyn ProgressSink) -> Result<Segformer> {
        progress.emit("Loading model", 10);

        let path = self.model_path.clone();
        let threads = self.intra_threads;
        let session = tokio::task::spawn_blocking(move || build_session(&path, threads))
            .await
            .map_err(|e| RemovalError::ModelInit(format!("model load task failed: {e}")))?
            .map_err(|e| RemovalError::ModelInit(format!("{e:#}")))?;

        progress.emit("Model loaded", 90);

        Ok(Segformer {
            session: Arc::new(Mutex::new(session)),
            preprocessor: Preprocessor::new(self.input_size),
            labels: self.labels.clone().into(),
        })
    }
}

fn build_session(path: &Path, intra_threads: usize) -> anyhow::Result<Session> {
    tracing::info!("Loading SegFormer model from {}", path.display());

    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?;

    #[cfg(feature = "cuda")]
    let builder = builder.with_execution_providers([
        ort::execution_providers::CUDAExecutionProvider::default().build(),
    ])?;

    let session = builder
        .commit_from_file(path)
        .with_context(|| format!("Failed to load model from {}", path.display()))?;

    tracing::info!("SegFormer model loaded successfully");
    Ok(session)
}

/// SegFormer semantic segmentation engine
///
/// Produces one binary mask per class present in the argmax map, at the
/// model's logit resolution (a quarter of the input size).
pub struct Segformer {
    session: Arc<Mutex<Session>>,
    preprocessor: Preprocessor,
    labels: Arc<[String]>,
}

impl SegmentationEngine for Segformer {
    async fn segment(&self, image: &SourceImage) -> Result<Vec<Segment>> {
        let tensor = self.preprocessor.preprocess(image.pixels());

        let session = Arc::clone(&self.session);
        let labels = Arc::clone(&self.labels);
        tokio::task::spawn_blocking(move || {
            let _span = tracing::debug_span!("segformer_segment").entered();
            let logits =
                infer_logits(&session, tensor).map_err(|e| RemovalError::Segmentation(format!("{e:#}")))?;
            Preprocessor::logits_to_segments(logits.view(), &labels)
        })
        .await
        .map_err(|e| RemovalError::Segmentation(format!("inference task failed: {e}")))?
    }
}

fn infer_logits(session: &Mutex<Session>, tensor: Array4<f32>) -> anyhow::Result<ArrayD<f32>> {
    let input = Value::from_array(tensor).context("Failed to build input tensor")?;

    let mut session = session.lock();
    let input_name = session
        .inputs
        .first()
        .map(|i| i.name.clone())
        .unwrap_or_else(|| "pixel_values".into());

    let outputs = session
        .run(ort::inputs![input_name => input])
        .context("Failed to run inference")?;

    // Logits are the first output: [1, num_classes, H/4, W/4]
    let logits = outputs[0]
        .try_extract_array::<f32>()
        .context("Model output is not an f32 tensor")?
        .to_owned();

    Ok(logits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_labels_reserve_background() {
        let loader = SegformerLoader::new(&ModelSettings {
            path: Some(PathBuf::from("segformer.onnx")),
            ..ModelSettings::default()
        })
        .unwrap();
        assert_eq!(loader.labels[0], BACKGROUND_LABEL);
        assert_eq!(loader.labels.len(), DEFAULT_LABELS.len());
    }

    #[test]
    fn missing_model_path_is_config_error() {
        let err = SegformerLoader::new(&ModelSettings::default()).unwrap_err();
        assert!(matches!(err, RemovalError::Config(_)));
    }
}
