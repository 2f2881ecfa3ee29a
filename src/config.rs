//! Settings loading and validation.
//!
//! Settings come from an optional TOML document; the CLI overrides individual
//! fields afterwards and calls [`Settings::validate`] once.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tracing::instrument;

use crate::error::{RemovalError, Result};
use crate::matte::{FeatherParams, ResampleFilter};

/// Fully merged settings for one process.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub feather: FeatherParams,
    pub resample: ResampleSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ResampleSettings {
    pub filter: ResampleFilter,
}

/// Where and how to load the segmentation model.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
    pub path: Option<PathBuf>,
    /// Class names indexed by class id. Defaults to the clothes-parsing table.
    pub labels: Option<Vec<String>>,
    /// Square model input edge in pixels
    pub input_size: u32,
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: None,
            labels: None,
            input_size: 512,
            intra_threads: 4,
        }
    }
}

impl Settings {
    /// Read and parse a TOML settings document.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|err| RemovalError::Config(format!("failed to read settings: {err}")))?;
        let settings: Settings = toml::from_str(&raw)
            .map_err(|err| RemovalError::Config(format!("invalid settings document: {err}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.feather.validate()?;
        if self.model.input_size == 0 {
            return Err(RemovalError::Config(
                "model input_size must be positive".to_string(),
            ));
        }
        if matches!(&self.model.labels, Some(labels) if labels.is_empty()) {
            return Err(RemovalError::Config(
                "model labels must not be empty when given".to_string(),
            ));
        }
        Ok(())
    }
}
