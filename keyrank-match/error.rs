use keyrank_core::ParamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Unknown weights variant: {0} (expected \"indoor\" or \"outdoor\")")]
    UnknownWeights(String),

    #[error("Unknown GNN layer: {0} (expected \"self\" or \"cross\")")]
    UnknownLayer(String),

    #[error("Invalid descriptor dimension: {dim} (must be a positive multiple of {heads})")]
    InvalidDescriptorDim { dim: usize, heads: usize },

    #[error("Invalid match threshold: {0} (must be in [0, 1])")]
    InvalidMatchThreshold(f32),

    #[error("Descriptor dimension mismatch: matcher expects {expected}, got {actual}")]
    DescriptorDimMismatch { expected: usize, actual: usize },

    #[error("Inconsistent detection result: {keypoints} keypoints, {scores} scores, {descriptors} descriptors")]
    InconsistentDetection {
        keypoints: usize,
        scores: usize,
        descriptors: usize,
    },

    #[error("Matcher parameters: {0}")]
    Params(#[from] ParamError),
}

impl MatchError {
    /// Bad inputs only spoil the pair at hand
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MatchError::DescriptorDimMismatch { .. } | MatchError::InconsistentDetection { .. }
        )
    }
}

pub type MatchResult<T> = Result<T, MatchError>;
