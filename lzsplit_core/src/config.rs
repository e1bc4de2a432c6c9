//! File-backed settings.
//!
//! ```toml
//! [pipeline]
//! codec = "lzo"
//! index_interval = 4
//! block_size_hint = 262144
//! queue_depth = 8
//!
//! [batch]
//! parallelism = 4
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::{DEFAULT_BLOCK_SIZE, DEFAULT_INDEX_INTERVAL};
use crate::pipeline::{PipelineConfig, DEFAULT_QUEUE_DEPTH};

pub const DEFAULT_CODEC: &str = "lzo";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub pipeline: PipelineSettings,
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// Codec name, resolved by the caller.
    pub codec: String,
    pub index_interval: u32,
    pub block_size_hint: u32,
    pub queue_depth: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            codec: DEFAULT_CODEC.to_string(),
            index_interval: DEFAULT_INDEX_INTERVAL,
            block_size_hint: DEFAULT_BLOCK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSettings {
    /// Pipelines run at once.
    pub parallelism: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid settings: {e}")))
    }

    /// Load and validate settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        let settings = Self::from_toml_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.codec.trim().is_empty() {
            return Err(Error::Config("pipeline.codec is empty".to_string()));
        }
        if self.batch.parallelism == 0 {
            return Err(Error::Config("batch.parallelism must be at least 1".to_string()));
        }
        // Path-independent checks are shared with the pipeline itself.
        self.pipeline_config("-", "-").validate()
    }

    /// Pipeline configuration for one source/destination pair.
    pub fn pipeline_config(
        &self,
        source_path: impl Into<String>,
        destination_path: impl Into<String>,
    ) -> PipelineConfig {
        PipelineConfig {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            index_interval: self.pipeline.index_interval,
            block_size_hint: self.pipeline.block_size_hint,
            queue_depth: self.pipeline.queue_depth,
        }
    }
}
