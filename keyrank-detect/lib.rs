//! Learned keypoint detection: a convolutional backbone producing a score map
//! and a coarse descriptor field, non-maximum suppression over the scores and
//! bilinear descriptor sampling at the selected keypoints.

pub mod backbone;
pub mod builder;
pub mod config;
pub mod detector;
pub mod error;
pub mod init;
pub mod sampler;
pub mod selection;
pub mod types;

pub use backbone::{Backbone, BackboneOutput};
pub use builder::DetectorBuilder;
pub use config::DetectorConfig;
pub use detector::Detector;
pub use error::{DetectError, DetectResult};
pub use sampler::DescriptorSampler;
pub use selection::KeypointSelector;
pub use types::{FeatureMap, KeypointLimit, ScoredKeypoint, SelectionParams};

/// Images are resized to this size before detection
pub const CANONICAL_WIDTH: usize = 640;
pub const CANONICAL_HEIGHT: usize = 480;

/// Name of the detector parameter file in a weights directory
pub const WEIGHTS_NAME: &str = "superpoint_v1";
