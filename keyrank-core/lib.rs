use ndarray::Array2;
use serde::{Deserialize, Serialize};

mod error;
pub mod nn;
mod params;

pub use error::{ParamError, ParamResult};
pub use params::ParamStore;

/// Sentinel stored in match arrays for keypoints without a counterpart
pub const NO_MATCH: i32 = -1;

/// Row-major grayscale image with samples in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl GrayImage {
    /// Wrap an existing sample buffer; the length is checked by the consumer
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        Self { width, height, data }
    }

    /// Convert 8-bit luma samples to the [0, 1] range
    pub fn from_luma8(width: usize, height: usize, pixels: &[u8]) -> Self {
        let data = pixels.iter().map(|&p| p as f32 / 255.0).collect();
        Self { width, height, data }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// Keypoint location in image pixels, serialized as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Keypoint {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Keypoint> for [f32; 2] {
    fn from(kp: Keypoint) -> Self {
        [kp.x, kp.y]
    }
}

/// Unit-norm float descriptor (256 entries with the default network)
pub type Descriptor = Vec<f32>;

/// Keypoints of one image with their parallel scores and descriptors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointSet {
    pub keypoints: Vec<Keypoint>,
    pub scores: Vec<f32>,
    pub descriptors: Vec<Descriptor>,
}

impl KeypointSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Parallel arrays must agree in length and every descriptor in dimension
    pub fn is_consistent(&self) -> bool {
        let n = self.keypoints.len();
        if self.scores.len() != n || self.descriptors.len() != n {
            return false;
        }
        match self.descriptors.first() {
            Some(first) => self.descriptors.iter().all(|d| d.len() == first.len()),
            None => true,
        }
    }

    pub fn descriptor_dim(&self) -> Option<usize> {
        self.descriptors.first().map(Vec::len)
    }

    /// Descriptors laid out channel-major (D x N)
    pub fn descriptor_matrix(&self) -> Array2<f32> {
        let n = self.len();
        let dim = self.descriptor_dim().unwrap_or(0);
        Array2::from_shape_fn((dim, n), |(c, i)| self.descriptors[i][c])
    }
}

/// Output of the detector for one image. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(flatten)]
    pub features: KeypointSet,
    /// Source image (width, height) the keypoints refer to
    pub image_size: (usize, usize),
}

impl DetectionResult {
    pub fn new(features: KeypointSet, width: usize, height: usize) -> Self {
        Self { features, image_size: (width, height) }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Correspondences between two keypoint sets
///
/// `matches0[i]` is the index into the second set matched with keypoint `i`
/// of the first set, or [`NO_MATCH`]. `matches1` mirrors it. Confidences are
/// zero wherever the match is invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSet {
    pub matches0: Vec<i32>,
    pub matches1: Vec<i32>,
    pub confidence0: Vec<f32>,
    pub confidence1: Vec<f32>,
}

impl MatchSet {
    /// All-sentinel result for sets of the given sizes
    pub fn unmatched(n0: usize, n1: usize) -> Self {
        Self {
            matches0: vec![NO_MATCH; n0],
            matches1: vec![NO_MATCH; n1],
            confidence0: vec![0.0; n0],
            confidence1: vec![0.0; n1],
        }
    }

    /// Valid `(i, j)` pairs in order of the first set
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.matches0
            .iter()
            .enumerate()
            .filter(|&(_, &j)| j >= 0)
            .map(|(i, &j)| (i, j as usize))
    }

    pub fn num_matches(&self) -> usize {
        self.pairs().count()
    }

    /// Every valid entry on either side points back at its source
    pub fn is_symmetric(&self) -> bool {
        let forward = self.matches0.iter().enumerate().all(|(i, &j)| {
            j < 0 || self.matches1.get(j as usize).is_some_and(|&back| back == i as i32)
        });
        let backward = self.matches1.iter().enumerate().all(|(j, &i)| {
            i < 0 || self.matches0.get(i as usize).is_some_and(|&back| back == j as i32)
        });
        forward && backward
    }
}

/// Initialize Rayon thread pool with the specified number of threads
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
}

/// Thread count used when the configuration leaves it unset
pub fn default_threads() -> usize {
    num_cpus::get().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> KeypointSet {
        KeypointSet {
            keypoints: vec![Keypoint::new(1.0, 2.0), Keypoint::new(3.5, 4.5)],
            scores: vec![0.9, 0.4],
            descriptors: vec![vec![1.0, 0.0, 0.0], vec![0.0, 0.6, 0.8]],
        }
    }

    #[test]
    fn test_descriptor_matrix_is_channel_major() {
        let m = sample_set().descriptor_matrix();
        assert_eq!(m.dim(), (3, 2));
        assert_eq!(m[[0, 0]], 1.0);
        assert_eq!(m[[2, 1]], 0.8);
    }

    #[test]
    fn test_inconsistent_set_detected() {
        let mut set = sample_set();
        assert!(set.is_consistent());
        set.scores.pop();
        assert!(!set.is_consistent());
    }

    #[test]
    fn test_unmatched_shapes() {
        let m = MatchSet::unmatched(0, 5);
        assert!(m.matches0.is_empty());
        assert_eq!(m.matches1, vec![NO_MATCH; 5]);
        assert_eq!(m.confidence1, vec![0.0; 5]);
        assert!(m.is_symmetric());
        assert_eq!(m.num_matches(), 0);
    }

    #[test]
    fn test_symmetry_check() {
        let mut m = MatchSet {
            matches0: vec![1, NO_MATCH],
            matches1: vec![NO_MATCH, 0],
            confidence0: vec![0.7, 0.0],
            confidence1: vec![0.0, 0.7],
        };
        assert!(m.is_symmetric());
        assert_eq!(m.pairs().collect::<Vec<_>>(), vec![(0, 1)]);

        m.matches1[1] = NO_MATCH;
        assert!(!m.is_symmetric());
    }

    #[test]
    fn test_detection_result_json_keys() {
        let result = DetectionResult::new(sample_set(), 640, 480);
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("keypoints").is_some());
        assert!(value.get("scores").is_some());
        assert!(value.get("descriptors").is_some());
        assert_eq!(value["keypoints"][1], serde_json::json!([3.5, 4.5]));

        let back: DetectionResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_from_luma8_scales() {
        let img = GrayImage::from_luma8(2, 1, &[0, 255]);
        assert_eq!(img.get(0, 0), 0.0);
        assert_eq!(img.get(1, 0), 1.0);
    }
}
