use keyrank_core::nn::Mlp;
use keyrank_core::{Keypoint, ParamResult, ParamStore};
use ndarray::Array2;

const ENCODER_PREFIX: &str = "kenc.encoder";

/// Centre keypoints on the image and scale by 0.7 of its larger side.
/// Returns a `2 x N` matrix of `(x, y)` columns.
pub fn normalize_keypoints(keypoints: &[Keypoint], width: usize, height: usize) -> Array2<f32> {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let scaling = width.max(height) as f32 * 0.7;
    Array2::from_shape_fn((2, keypoints.len()), |(axis, i)| {
        let kp = keypoints[i];
        match axis {
            0 => (kp.x - cx) / scaling,
            _ => (kp.y - cy) / scaling,
        }
    })
}

/// Lifts `(x, y, score)` per keypoint to the descriptor dimension
#[derive(Debug, Clone)]
pub struct KeypointEncoder {
    mlp: Mlp,
}

impl KeypointEncoder {
    /// `channels` runs from the 3 input channels to the descriptor dimension
    pub fn load(store: &ParamStore, channels: &[usize]) -> ParamResult<Self> {
        Ok(Self {
            mlp: Mlp::load(store, ENCODER_PREFIX, channels)?,
        })
    }

    /// Conv / batch-norm tensor prefixes, for parameter generation
    pub fn layer_prefixes(channels: &[usize]) -> Vec<(String, Option<String>)> {
        Mlp::layer_prefixes(ENCODER_PREFIX, channels)
    }

    pub fn output_channels(&self) -> usize {
        self.mlp.output_channels()
    }

    /// `positions` is `2 x N` from [`normalize_keypoints`]; output is `D x N`
    pub fn forward(&self, positions: &Array2<f32>, scores: &[f32]) -> Array2<f32> {
        let n = positions.ncols();
        let input = Array2::from_shape_fn((3, n), |(c, i)| if c < 2 { positions[[c, i]] } else { scores[i] });
        self.mlp.forward(input.view())
    }
}
