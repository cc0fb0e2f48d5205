use std::fmt;
use std::str::FromStr;

use crate::builder::MatcherBuilder;
use crate::error::{MatchError, MatchResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Attention heads per GNN layer
pub const NUM_HEADS: usize = 4;

/// Which pretrained matcher parameter set to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsVariant {
    Indoor,
    Outdoor,
}

impl WeightsVariant {
    /// Parameter file stem inside a weights directory
    pub fn file_stem(&self) -> &'static str {
        match self {
            WeightsVariant::Indoor => "superglue_indoor",
            WeightsVariant::Outdoor => "superglue_outdoor",
        }
    }
}

impl FromStr for WeightsVariant {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indoor" => Ok(WeightsVariant::Indoor),
            "outdoor" => Ok(WeightsVariant::Outdoor),
            other => Err(MatchError::UnknownWeights(other.to_string())),
        }
    }
}

impl fmt::Display for WeightsVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightsVariant::Indoor => write!(f, "indoor"),
            WeightsVariant::Outdoor => write!(f, "outdoor"),
        }
    }
}

/// Source of the attention messages in one GNN layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Keypoints attend to their own image
    Intra,
    /// Keypoints attend to the other image
    Cross,
}

impl FromStr for LayerKind {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self" => Ok(LayerKind::Intra),
            "cross" => Ok(LayerKind::Cross),
            other => Err(MatchError::UnknownLayer(other.to_string())),
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Intra => write!(f, "self"),
            LayerKind::Cross => write!(f, "cross"),
        }
    }
}

/// Complete matcher configuration. Weights and layer names are kept as the
/// strings of the configuration surface and checked by [`MatcherConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatcherConfig {
    pub descriptor_dim: usize,
    /// `"indoor"` or `"outdoor"`
    pub weights: String,
    /// Hidden widths of the keypoint encoder
    pub keypoint_encoder: Vec<usize>,
    /// Sequence of `"self"` / `"cross"` layers
    pub gnn_layers: Vec<String>,
    pub sinkhorn_iterations: usize,
    /// Mutual matches need a confidence strictly above this
    pub match_threshold: f32,
    /// Metadata
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub description: Option<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            descriptor_dim: 256,
            weights: WeightsVariant::Indoor.to_string(),
            keypoint_encoder: vec![32, 64, 128, 256],
            gnn_layers: default_layers(),
            sinkhorn_iterations: 100,
            match_threshold: 0.2,
            name: None,
            description: None,
        }
    }
}

fn default_layers() -> Vec<String> {
    ["self", "cross"].iter().cycle().take(18).map(|s| s.to_string()).collect()
}

impl MatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indoor() -> Self {
        Self {
            name: Some("Indoor".to_string()),
            description: Some("Weights trained on indoor scenes".to_string()),
            ..Self::default()
        }
    }

    pub fn outdoor() -> Self {
        Self {
            weights: WeightsVariant::Outdoor.to_string(),
            name: Some("Outdoor".to_string()),
            description: Some("Weights trained on outdoor scenes".to_string()),
            ..Self::default()
        }
    }

    /// Fewer Sinkhorn iterations, used when scoring many candidates
    pub fn ranking_preset() -> Self {
        Self {
            sinkhorn_iterations: 20,
            name: Some("Ranking".to_string()),
            description: Some("Indoor weights with a short Sinkhorn schedule".to_string()),
            ..Self::default()
        }
    }

    /// Add metadata to configuration
    pub fn with_metadata(mut self, name: &str, description: &str) -> Self {
        self.name = Some(name.to_string());
        self.description = Some(description.to_string());
        self
    }

    /// Convert to MatcherBuilder for further customization
    pub fn to_builder(self) -> MatcherBuilder {
        MatcherBuilder::from_config(self)
    }

    pub fn weights_variant(&self) -> MatchResult<WeightsVariant> {
        self.weights.parse()
    }

    pub fn layer_kinds(&self) -> MatchResult<Vec<LayerKind>> {
        self.gnn_layers.iter().map(|name| name.parse()).collect()
    }

    /// Channel widths of the keypoint encoder MLP, input to output
    pub fn encoder_channels(&self) -> Vec<usize> {
        let mut channels = Vec::with_capacity(self.keypoint_encoder.len() + 2);
        channels.push(3);
        channels.extend(&self.keypoint_encoder);
        channels.push(self.descriptor_dim);
        channels
    }

    pub fn summary(&self) -> String {
        format!(
            "MatcherConfig: weights={}, descriptor_dim={}, encoder={:?}, gnn_layers={}, sinkhorn_iterations={}, match_threshold={}",
            self.weights,
            self.descriptor_dim,
            self.keypoint_encoder,
            self.gnn_layers.len(),
            self.sinkhorn_iterations,
            self.match_threshold
        )
    }

    pub fn validate(&self) -> MatchResult<()> {
        self.weights_variant()?;
        self.layer_kinds()?;
        if self.descriptor_dim == 0 || self.descriptor_dim % NUM_HEADS != 0 {
            return Err(MatchError::InvalidDescriptorDim {
                dim: self.descriptor_dim,
                heads: NUM_HEADS,
            });
        }
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(MatchError::InvalidMatchThreshold(self.match_threshold));
        }
        Ok(())
    }

    /// Save configuration to JSON file
    #[cfg(feature = "serde")]
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from JSON file
    #[cfg(feature = "serde")]
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save configuration to TOML file
    #[cfg(feature = "serde")]
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from TOML file
    #[cfg(feature = "serde")]
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    #[cfg(feature = "serde")]
    pub fn from_toml(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}
