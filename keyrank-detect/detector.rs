use keyrank_core::{DetectionResult, GrayImage, KeypointSet, ParamStore};
use log::debug;

use crate::backbone::{Backbone, BackboneOutput, CELL};
use crate::config::DetectorConfig;
use crate::error::{DetectError, DetectResult};
use crate::sampler::DescriptorSampler;
use crate::selection::KeypointSelector;
use crate::types::SelectionParams;

/// Learned keypoint detector and descriptor extractor.
///
/// Parameters are loaded once in [`Detector::new`]; detection is a pure
/// function of the image, so one detector can serve many threads.
pub struct Detector {
    config: DetectorConfig,
    selection: SelectionParams,
    backbone: Backbone,
    sampler: DescriptorSampler,
}

impl Detector {
    /// Validates the configuration, then loads the backbone from `params`
    pub fn new(config: DetectorConfig, params: &ParamStore) -> DetectResult<Self> {
        config.validate()?;
        let selection = config.selection_params()?;
        let backbone = Backbone::load(params, config.descriptor_dim)?;
        debug!("Detector ready: {}", config.summary());

        Ok(Self {
            config,
            selection,
            backbone,
            sampler: DescriptorSampler::new(CELL),
        })
    }

    /// Validates image data before processing
    fn validate_image(&self, image: &GrayImage) -> DetectResult<()> {
        if image.width < CELL || image.height < CELL {
            return Err(DetectError::ImageTooSmall {
                width: image.width,
                height: image.height,
                min_size: CELL,
            });
        }
        let expected_len = image.width * image.height;
        if image.data.len() != expected_len {
            return Err(DetectError::InvalidImageData {
                expected_len,
                actual_len: image.data.len(),
            });
        }
        Ok(())
    }

    /// Detect keypoints and describe them
    pub fn detect(&self, image: &GrayImage) -> DetectResult<DetectionResult> {
        self.validate_image(image)?;
        let output = self.backbone.forward(image);
        Ok(self.extract(&output, image.width, image.height))
    }

    /// Turn raw network outputs into keypoints, scores and descriptors
    pub fn extract(&self, output: &BackboneOutput, width: usize, height: usize) -> DetectionResult {
        let scores = Backbone::scores_from_logits(&output.logits);
        let selected = KeypointSelector::select(&scores, &self.selection);

        let keypoints: Vec<_> = selected.iter().map(|sk| sk.keypoint).collect();
        let descriptors = self.sampler.sample(&keypoints, &output.descriptors);
        let scores = selected.iter().map(|sk| sk.score).collect();
        debug!("Detected {} keypoints in {}x{} image", keypoints.len(), width, height);

        DetectionResult::new(
            KeypointSet {
                keypoints,
                scores,
                descriptors,
            },
            width,
            height,
        )
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn descriptor_dim(&self) -> usize {
        self.backbone.descriptor_dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::DETECTOR_CHANNELS;
    use crate::init::initial_params;
    use crate::types::FeatureMap;
    use approx::assert_abs_diff_eq;
    use keyrank_core::Keypoint;

    const DIM: usize = 8;

    fn create_test_config() -> DetectorConfig {
        DetectorConfig {
            descriptor_dim: DIM,
            ..DetectorConfig::default()
        }
    }

    fn create_test_detector() -> Detector {
        Detector::new(create_test_config(), &initial_params(DIM, 11)).unwrap()
    }

    /// Logits for an 8x8-cell map where every cell votes "no keypoint" except
    /// one sharp response at pixel (x, y)
    fn single_corner_output(x: usize, y: usize) -> BackboneOutput {
        let (cx, cy, j, i) = (x / CELL, y / CELL, x % CELL, y % CELL);
        let logits = FeatureMap::from_fn(DETECTOR_CHANNELS, 8, 8, |c, yy, xx| {
            if yy == cy && xx == cx && c == i * CELL + j {
                20.0
            } else if c == DETECTOR_CHANNELS - 1 {
                10.0
            } else {
                0.0
            }
        });
        let descriptors = FeatureMap::from_fn(DIM, 8, 8, |c, yy, xx| 1.0 + (c + yy + xx) as f32);
        BackboneOutput { logits, descriptors }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DetectorConfig {
            nms_radius: -3,
            ..create_test_config()
        };
        let result = Detector::new(config, &initial_params(DIM, 0));
        assert!(matches!(result, Err(DetectError::InvalidNmsRadius(-3))));
    }

    #[test]
    fn test_missing_parameters_are_fatal() {
        let err = Detector::new(create_test_config(), &ParamStore::new()).err().unwrap();
        assert!(matches!(err, DetectError::Params(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_too_small_image() {
        let detector = create_test_detector();
        let img = GrayImage::from_fn(7, 16, |_, _| 0.5);
        let err = detector.detect(&img).unwrap_err();
        assert!(matches!(err, DetectError::ImageTooSmall { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_invalid_image_data() {
        let detector = create_test_detector();
        let img = GrayImage::new(16, 16, vec![0.0; 100]);
        assert!(matches!(detector.detect(&img), Err(DetectError::InvalidImageData { .. })));
    }

    #[test]
    fn test_single_corner_extraction() {
        let detector = create_test_detector();
        let result = detector.extract(&single_corner_output(20, 30), 64, 64);

        assert_eq!(result.len(), 1);
        assert_eq!(result.image_size, (64, 64));
        assert_eq!(result.features.keypoints[0], Keypoint::new(20.0, 30.0));
        assert!(result.features.scores[0] > 0.99);
        let d = &result.features.descriptors[0];
        assert_eq!(d.len(), DIM);
        assert_abs_diff_eq!(d.iter().map(|v| v * v).sum::<f32>(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_corner_in_border_is_dropped() {
        let detector = create_test_detector();
        let result = detector.extract(&single_corner_output(2, 30), 64, 64);
        assert!(result.is_empty());
        assert!(result.features.is_consistent());
    }

    #[test]
    fn test_detect_end_to_end() {
        let detector = create_test_detector();
        let img = GrayImage::from_fn(32, 24, |x, y| if (x / 4 + y / 4) % 2 == 0 { 1.0 } else { 0.0 });
        let result = detector.detect(&img).unwrap();

        assert_eq!(result.image_size, (32, 24));
        assert!(result.features.is_consistent());
        assert!(result.len() <= 1024);
        for (kp, d) in result.features.keypoints.iter().zip(&result.features.descriptors) {
            assert!(kp.x >= 4.0 && kp.x < 28.0);
            assert!(kp.y >= 4.0 && kp.y < 20.0);
            assert_eq!(d.len(), DIM);
        }
    }

    #[test]
    fn test_detection_is_deterministic() {
        let detector = create_test_detector();
        let img = GrayImage::from_fn(24, 24, |x, y| ((x * y) % 7) as f32 / 7.0);
        assert_eq!(detector.detect(&img).unwrap(), detector.detect(&img).unwrap());
    }

    #[test]
    fn test_detector_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Detector>();
    }
}
