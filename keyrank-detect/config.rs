use crate::builder::DetectorBuilder;
use crate::error::{DetectError, DetectResult};
use crate::types::{KeypointLimit, SelectionParams};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Complete detector configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DetectorConfig {
    /// Output channels of the descriptor head
    pub descriptor_dim: usize,
    /// Half-width of the suppression window
    pub nms_radius: i32,
    /// Scores must be strictly greater than this to be kept
    pub keypoint_threshold: f32,
    /// Maximum keypoints per image, `-1` for no limit
    pub max_keypoints: i32,
    /// Keypoints closer than this to an edge are dropped
    pub remove_borders: usize,
    /// Metadata
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub description: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            descriptor_dim: 256,
            nms_radius: 4,
            keypoint_threshold: 0.005,
            max_keypoints: 1024,
            remove_borders: 4,
            name: None,
            description: None,
        }
    }
}

impl DetectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every keypoint above a lower threshold, for dense matching
    pub fn dense_preset() -> Self {
        Self {
            keypoint_threshold: 0.001,
            max_keypoints: -1,
            nms_radius: 3,
            name: Some("Dense".to_string()),
            description: Some("All keypoints above a low threshold".to_string()),
            ..Self::default()
        }
    }

    /// Add metadata to configuration
    pub fn with_metadata(mut self, name: &str, description: &str) -> Self {
        self.name = Some(name.to_string());
        self.description = Some(description.to_string());
        self
    }

    /// Convert to DetectorBuilder for further customization
    pub fn to_builder(self) -> DetectorBuilder {
        DetectorBuilder::from_config(self)
    }

    pub fn summary(&self) -> String {
        let limit = match KeypointLimit::from_config(self.max_keypoints) {
            Some(KeypointLimit::TopK(k)) => k.to_string(),
            _ => "unlimited".to_string(),
        };
        format!(
            "DetectorConfig: descriptor_dim={}, nms_radius={}, threshold={}, max_keypoints={}, borders={}",
            self.descriptor_dim, self.nms_radius, self.keypoint_threshold, limit, self.remove_borders
        )
    }

    pub fn validate(&self) -> DetectResult<()> {
        self.selection_params()?;
        if self.descriptor_dim == 0 {
            return Err(DetectError::InvalidDescriptorDim(self.descriptor_dim));
        }
        Ok(())
    }

    /// Selection stage parameters, validated
    pub fn selection_params(&self) -> DetectResult<SelectionParams> {
        let nms_radius =
            usize::try_from(self.nms_radius).map_err(|_| DetectError::InvalidNmsRadius(self.nms_radius))?;
        let limit = KeypointLimit::from_config(self.max_keypoints)
            .ok_or(DetectError::InvalidMaxKeypoints(self.max_keypoints))?;
        if !(0.0..1.0).contains(&self.keypoint_threshold) {
            return Err(DetectError::InvalidThreshold(self.keypoint_threshold));
        }
        Ok(SelectionParams {
            nms_radius,
            threshold: self.keypoint_threshold,
            border: self.remove_borders,
            limit,
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.descriptor_dim, 256);
        assert_eq!(config.nms_radius, 4);
        assert_eq!(config.keypoint_threshold, 0.005);
        assert_eq!(config.max_keypoints, 1024);
        assert_eq!(config.remove_borders, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_keypoints_validation() {
        let mut config = DetectorConfig::default();
        config.max_keypoints = 0;
        assert!(matches!(config.validate(), Err(DetectError::InvalidMaxKeypoints(0))));
        config.max_keypoints = -2;
        assert!(matches!(config.validate(), Err(DetectError::InvalidMaxKeypoints(-2))));
        config.max_keypoints = -1;
        assert_eq!(config.selection_params().unwrap().limit, KeypointLimit::Unlimited);
    }

    #[test]
    fn test_negative_radius_rejected() {
        let config = DetectorConfig { nms_radius: -1, ..DetectorConfig::default() };
        assert!(matches!(config.validate(), Err(DetectError::InvalidNmsRadius(-1))));
    }

    #[test]
    fn test_threshold_and_dim_validation() {
        let config = DetectorConfig { keypoint_threshold: 1.0, ..DetectorConfig::default() };
        assert!(matches!(config.validate(), Err(DetectError::InvalidThreshold(_))));
        let config = DetectorConfig { descriptor_dim: 0, ..DetectorConfig::default() };
        assert!(matches!(config.validate(), Err(DetectError::InvalidDescriptorDim(0))));
    }

    #[test]
    fn test_dense_preset() {
        let config = DetectorConfig::dense_preset();
        assert!(config.validate().is_ok());
        assert!(config.summary().contains("unlimited"));
        assert_eq!(config.name.as_deref(), Some("Dense"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_toml_round_trip() {
        let config = DetectorConfig::default().with_metadata("Indoor", "Default detector");
        let text = config.to_toml().unwrap();
        let back = DetectorConfig::from_toml(&text).unwrap();
        assert_eq!(back, config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_partial_uses_defaults_and_validates() {
        let config = DetectorConfig::from_json(r#"{"max_keypoints": -1}"#).unwrap();
        assert_eq!(config.max_keypoints, -1);
        assert_eq!(config.nms_radius, 4);
        assert!(DetectorConfig::from_json(r#"{"max_keypoints": 0}"#).is_err());
    }
}
