use keyrank_core::ParamStore;

use crate::config::{LayerKind, MatcherConfig, WeightsVariant};
use crate::error::MatchResult;
use crate::matcher::Matcher;

/// Builder for creating a `Matcher`
#[derive(Debug, Clone, Default)]
pub struct MatcherBuilder {
    config: MatcherConfig,
}

impl MatcherBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptor_dim(mut self, dim: usize) -> Self {
        self.config.descriptor_dim = dim;
        self
    }

    pub fn weights(mut self, variant: WeightsVariant) -> Self {
        self.config.weights = variant.to_string();
        self
    }

    /// Hidden widths of the keypoint encoder
    pub fn keypoint_encoder(mut self, widths: &[usize]) -> Self {
        self.config.keypoint_encoder = widths.to_vec();
        self
    }

    pub fn gnn_layers(mut self, layers: &[LayerKind]) -> Self {
        self.config.gnn_layers = layers.iter().map(LayerKind::to_string).collect();
        self
    }

    pub fn sinkhorn_iterations(mut self, iterations: usize) -> Self {
        self.config.sinkhorn_iterations = iterations;
        self
    }

    pub fn match_threshold(mut self, threshold: f32) -> Self {
        self.config.match_threshold = threshold;
        self
    }

    /// Apply the ranking preset, keeping the network shape
    pub fn preset_ranking(mut self) -> Self {
        let preset = MatcherConfig::ranking_preset();
        self.config.sinkhorn_iterations = preset.sinkhorn_iterations;
        self.config.match_threshold = preset.match_threshold;
        self
    }

    /// Validate the configuration and load the network from `params`
    pub fn build(self, params: &ParamStore) -> MatchResult<Matcher> {
        Matcher::new(self.config, params)
    }

    pub fn summary(&self) -> String {
        self.config.summary()
    }

    pub fn from_config(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn to_config(self) -> MatcherConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MatchError;

    #[test]
    fn test_builder_sets_fields() {
        let config = MatcherBuilder::new()
            .weights(WeightsVariant::Outdoor)
            .descriptor_dim(64)
            .keypoint_encoder(&[16, 32])
            .gnn_layers(&[LayerKind::Intra, LayerKind::Cross])
            .sinkhorn_iterations(5)
            .match_threshold(0.5)
            .to_config();
        assert_eq!(config.weights, "outdoor");
        assert_eq!(config.encoder_channels(), vec![3, 16, 32, 64]);
        assert_eq!(config.gnn_layers, vec!["self".to_string(), "cross".to_string()]);
        assert_eq!(config.sinkhorn_iterations, 5);
        assert_eq!(config.match_threshold, 0.5);
    }

    #[test]
    fn test_preset_ranking_keeps_shape() {
        let config = MatcherBuilder::new().descriptor_dim(64).preset_ranking().to_config();
        assert_eq!(config.descriptor_dim, 64);
        assert_eq!(config.sinkhorn_iterations, 20);
    }

    #[test]
    fn test_build_validates_first() {
        let result = MatcherBuilder::new().descriptor_dim(6).build(&ParamStore::new());
        assert!(matches!(result, Err(MatchError::InvalidDescriptorDim { dim: 6, .. })));
    }
}
