use keyrank_core::nn::Conv1x1;
use keyrank_core::{DetectionResult, MatchSet, ParamStore};
use log::debug;
use ndarray::Array2;

use crate::attention::AttentionalGnn;
use crate::config::{MatcherConfig, NUM_HEADS};
use crate::encoder::{KeypointEncoder, normalize_keypoints};
use crate::error::{MatchError, MatchResult};
use crate::transport::{log_optimal_transport, mutual_matches};

/// Attention-based keypoint matcher with an optimal-transport assignment.
///
/// Built once from a configuration and a parameter store; matching is a pure
/// function of the two detection results.
pub struct Matcher {
    config: MatcherConfig,
    encoder: KeypointEncoder,
    gnn: AttentionalGnn,
    final_proj: Conv1x1,
    bin_score: f32,
}

impl Matcher {
    /// Validates the configuration, then loads every layer it names
    pub fn new(config: MatcherConfig, params: &ParamStore) -> MatchResult<Self> {
        config.validate()?;
        let kinds = config.layer_kinds()?;
        let dim = config.descriptor_dim;

        let encoder = KeypointEncoder::load(params, &config.encoder_channels())?;
        let gnn = AttentionalGnn::load(params, dim, NUM_HEADS, &kinds)?;
        let final_proj = Conv1x1::load(params, "final_proj", dim, dim)?;
        let bin_score = params.scalar("bin_score")?;
        debug!("Matcher ready: {}", config.summary());

        Ok(Self {
            config,
            encoder,
            gnn,
            final_proj,
            bin_score,
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    fn check_input(&self, detection: &DetectionResult) -> MatchResult<()> {
        let features = &detection.features;
        if !features.is_consistent() {
            return Err(MatchError::InconsistentDetection {
                keypoints: features.keypoints.len(),
                scores: features.scores.len(),
                descriptors: features.descriptors.len(),
            });
        }
        match features.descriptor_dim() {
            Some(actual) if actual != self.config.descriptor_dim => Err(MatchError::DescriptorDimMismatch {
                expected: self.config.descriptor_dim,
                actual,
            }),
            _ => Ok(()),
        }
    }

    /// Match the keypoints of two images.
    ///
    /// When either side has no keypoints the network is not evaluated and
    /// every entry is unmatched.
    pub fn match_pair(&self, first: &DetectionResult, second: &DetectionResult) -> MatchResult<MatchSet> {
        self.check_input(first)?;
        self.check_input(second)?;

        if first.is_empty() || second.is_empty() {
            debug!("Empty keypoint set ({} vs {}), skipping matching", first.len(), second.len());
            return Ok(MatchSet::unmatched(first.len(), second.len()));
        }

        let scores = self.score_matrix(first, second);
        let assignment = log_optimal_transport(&scores, self.bin_score, self.config.sinkhorn_iterations);
        let matches = mutual_matches(&assignment, self.config.match_threshold);
        debug!(
            "Matched {} of {}x{} keypoints",
            matches.num_matches(),
            first.len(),
            second.len()
        );
        Ok(matches)
    }

    /// Scaled similarity of the refined descriptors, `N0 x N1`
    pub fn score_matrix(&self, first: &DetectionResult, second: &DetectionResult) -> Array2<f32> {
        let desc0 = self.embed(first);
        let desc1 = self.embed(second);
        let (desc0, desc1) = self.gnn.forward(desc0, desc1);

        let mdesc0 = self.final_proj.forward(desc0.view());
        let mdesc1 = self.final_proj.forward(desc1.view());
        mdesc0.t().dot(&mdesc1) / (self.config.descriptor_dim as f32).sqrt()
    }

    /// Descriptors plus the encoded keypoint positions and scores, `D x N`
    fn embed(&self, detection: &DetectionResult) -> Array2<f32> {
        let (width, height) = detection.image_size;
        let features = &detection.features;
        let positions = normalize_keypoints(&features.keypoints, width, height);
        features.descriptor_matrix() + self.encoder.forward(&positions, &features.scores)
    }
}
