use keyrank_core::ParamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Invalid NMS radius: {0} (must be >= 0)")]
    InvalidNmsRadius(i32),

    #[error("Invalid max_keypoints: {0} (must be positive or -1)")]
    InvalidMaxKeypoints(i32),

    #[error("Invalid keypoint threshold: {0} (must be in [0, 1))")]
    InvalidThreshold(f32),

    #[error("Invalid descriptor dimension: {0} (must be > 0)")]
    InvalidDescriptorDim(usize),

    #[error("Image data length mismatch: expected {expected_len}, got {actual_len}")]
    InvalidImageData { expected_len: usize, actual_len: usize },

    #[error("Image {width}x{height} too small (minimum {min_size}x{min_size})")]
    ImageTooSmall { width: usize, height: usize, min_size: usize },

    #[error("Backbone parameters: {0}")]
    Params(#[from] ParamError),
}

impl DetectError {
    /// Configuration and parameter failures make the detector unusable;
    /// image failures only affect the image at hand.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DetectError::InvalidImageData { .. } | DetectError::ImageTooSmall { .. })
    }
}

pub type DetectResult<T> = Result<T, DetectError>;
