use keyrank_core::ParamStore;

use crate::config::DetectorConfig;
use crate::detector::Detector;
use crate::error::DetectResult;

/// Builder for creating a `Detector`
#[derive(Debug, Clone, Default)]
pub struct DetectorBuilder {
    config: DetectorConfig,
}

impl DetectorBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the descriptor dimension; must match the loaded parameters
    pub fn descriptor_dim(mut self, dim: usize) -> Self {
        self.config.descriptor_dim = dim;
        self
    }

    /// Set the non-maximum suppression radius in pixels
    pub fn nms_radius(mut self, radius: i32) -> Self {
        self.config.nms_radius = radius;
        self
    }

    /// Set the detection threshold on the probability map
    pub fn keypoint_threshold(mut self, threshold: f32) -> Self {
        self.config.keypoint_threshold = threshold;
        self
    }

    /// Cap the number of keypoints per image, `-1` for no limit
    pub fn max_keypoints(mut self, max: i32) -> Self {
        self.config.max_keypoints = max;
        self
    }

    pub fn unlimited_keypoints(self) -> Self {
        self.max_keypoints(-1)
    }

    /// Set the border margin in pixels
    pub fn remove_borders(mut self, border: usize) -> Self {
        self.config.remove_borders = border;
        self
    }

    /// Apply the dense preset, keeping the descriptor dimension
    pub fn preset_dense(mut self) -> Self {
        let dim = self.config.descriptor_dim;
        self.config = DetectorConfig::dense_preset();
        self.config.descriptor_dim = dim;
        self
    }

    /// Validate the configuration and load the backbone from `params`
    pub fn build(self, params: &ParamStore) -> DetectResult<Detector> {
        Detector::new(self.config, params)
    }

    pub fn summary(&self) -> String {
        self.config.summary()
    }

    pub fn from_config(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn to_config(self) -> DetectorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectError;
    use crate::init::initial_params;

    #[test]
    fn test_builder_sets_fields() {
        let config = DetectorBuilder::new()
            .nms_radius(2)
            .keypoint_threshold(0.01)
            .max_keypoints(500)
            .remove_borders(8)
            .to_config();
        assert_eq!(config.nms_radius, 2);
        assert_eq!(config.keypoint_threshold, 0.01);
        assert_eq!(config.max_keypoints, 500);
        assert_eq!(config.remove_borders, 8);
    }

    #[test]
    fn test_preset_keeps_descriptor_dim() {
        let config = DetectorBuilder::new().descriptor_dim(64).preset_dense().to_config();
        assert_eq!(config.descriptor_dim, 64);
        assert_eq!(config.max_keypoints, -1);
    }

    #[test]
    fn test_build_rejects_invalid_config_before_loading() {
        let result = DetectorBuilder::new().max_keypoints(0).build(&ParamStore::new());
        assert!(matches!(result, Err(DetectError::InvalidMaxKeypoints(0))));
    }

    #[test]
    fn test_build_with_parameters() {
        let params = initial_params(32, 0);
        let detector = DetectorBuilder::new().descriptor_dim(32).unlimited_keypoints().build(&params);
        assert!(detector.is_ok());
    }
}
