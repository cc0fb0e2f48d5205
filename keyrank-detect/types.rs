use ndarray::{Array2, ArrayView1};
use keyrank_core::Keypoint;

/// Keypoint with its detector probability, before descriptor sampling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredKeypoint {
    pub keypoint: Keypoint,
    pub score: f32,
}

/// Cap on the number of keypoints kept per image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypointLimit {
    Unlimited,
    TopK(usize),
}

impl KeypointLimit {
    /// Interpret the configuration convention where `-1` means unlimited.
    /// Returns `None` for `0` and anything below `-1`.
    pub fn from_config(value: i32) -> Option<Self> {
        match value {
            -1 => Some(KeypointLimit::Unlimited),
            v if v > 0 => Some(KeypointLimit::TopK(v as usize)),
            _ => None,
        }
    }
}

/// Parameters of the keypoint selection stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionParams {
    pub nms_radius: usize,
    pub threshold: f32,
    pub border: usize,
    pub limit: KeypointLimit,
}

/// Dense multi-channel map stored channel-major: `data[[c, y * width + x]]`
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    pub data: Array2<f32>,
    pub height: usize,
    pub width: usize,
}

impl FeatureMap {
    pub fn new(data: Array2<f32>, height: usize, width: usize) -> Self {
        assert_eq!(data.ncols(), height * width, "feature map columns must equal height * width");
        Self { data, height, width }
    }

    pub fn from_fn(channels: usize, height: usize, width: usize, f: impl Fn(usize, usize, usize) -> f32) -> Self {
        let data = Array2::from_shape_fn((channels, height * width), |(c, i)| f(c, i / width, i % width));
        Self { data, height, width }
    }

    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[[c, y * self.width + x]]
    }

    /// Channel vector at one position
    pub fn column(&self, y: usize, x: usize) -> ArrayView1<'_, f32> {
        self.data.column(y * self.width + x)
    }
}
