use std::path::{Path, PathBuf};

use keyrank_core::default_threads;
use keyrank_detect::DetectorConfig;
use keyrank_match::MatcherConfig;
use serde::{Deserialize, Serialize};

use crate::{PipelineError, PipelineResult};

/// Settings of a whole batch run, usually read from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding `superpoint_v1.bin` and `superglue_<variant>.bin`
    pub weights_dir: PathBuf,
    /// Global rayon pool size
    pub n_threads: usize,
    pub detector: DetectorConfig,
    pub matcher: MatcherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            weights_dir: PathBuf::from("weights"),
            n_threads: default_threads(),
            detector: DetectorConfig::default(),
            matcher: MatcherConfig::ranking_preset(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        self.detector.validate()?;
        self.matcher.validate()?;
        if self.n_threads == 0 {
            return Err(PipelineError::InvalidConfig("n_threads must be > 0".to_string()));
        }
        if self.detector.descriptor_dim != self.matcher.descriptor_dim {
            return Err(PipelineError::InvalidConfig(format!(
                "detector produces {}-d descriptors, matcher expects {}",
                self.detector.descriptor_dim, self.matcher.descriptor_dim
            )));
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "weights={}, threads={} | {} | {}",
            self.weights_dir.display(),
            self.n_threads,
            self.detector.summary(),
            self.matcher.summary()
        )
    }

    pub fn from_toml(toml_str: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn load_toml<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }
}
