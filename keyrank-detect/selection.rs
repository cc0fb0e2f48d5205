use keyrank_core::Keypoint;
use ndarray::{Array2, ArrayView2, Zip};

use crate::types::{KeypointLimit, ScoredKeypoint, SelectionParams};

/// Non-maximum suppression and keypoint selection over a probability map
pub struct KeypointSelector;

impl KeypointSelector {
    /// Full selection: NMS, threshold, border removal, top-K
    pub fn select(scores: &Array2<f32>, params: &SelectionParams) -> Vec<ScoredKeypoint> {
        let (height, width) = scores.dim();
        let suppressed = Self::simple_nms(scores, params.nms_radius);
        let keypoints = Self::threshold_keypoints(&suppressed, params.threshold);
        let keypoints = Self::remove_borders(keypoints, params.border, height, width);
        Self::top_k(keypoints, params.limit)
    }

    /// Max filter over the `(2r+1)^2` window, clipped at the map edges
    pub fn max_pool(scores: ArrayView2<f32>, radius: usize) -> Array2<f32> {
        let (height, width) = scores.dim();

        let mut horizontal = Array2::<f32>::zeros((height, width));
        for y in 0..height {
            for x in 0..width {
                let lo = x.saturating_sub(radius);
                let hi = (x + radius).min(width - 1);
                let mut m = f32::NEG_INFINITY;
                for xx in lo..=hi {
                    m = m.max(scores[[y, xx]]);
                }
                horizontal[[y, x]] = m;
            }
        }

        let mut pooled = Array2::<f32>::zeros((height, width));
        for y in 0..height {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius).min(height - 1);
            for x in 0..width {
                let mut m = f32::NEG_INFINITY;
                for yy in lo..=hi {
                    m = m.max(horizontal[[yy, x]]);
                }
                pooled[[y, x]] = m;
            }
        }
        pooled
    }

    /// Keep scores that are the maximum of their window, zero everything else.
    ///
    /// Two extra rounds recover maxima hidden by a suppressed neighbour's
    /// window: the mask of accepted maxima is dilated, the covered scores are
    /// zeroed, and new maxima outside the dilated region are accepted.
    pub fn simple_nms(scores: &Array2<f32>, radius: usize) -> Array2<f32> {
        let is_local_max = |map: &Array2<f32>| -> Array2<bool> {
            let pooled = Self::max_pool(map.view(), radius);
            Zip::from(map).and(&pooled).map_collect(|&v, &m| v == m)
        };

        let mut max_mask = is_local_max(scores);
        for _ in 0..2 {
            let mask_f = max_mask.mapv(|m| if m { 1.0f32 } else { 0.0 });
            let supp_mask = Self::max_pool(mask_f.view(), radius).mapv(|v| v > 0.0);
            let supp_scores = Zip::from(scores)
                .and(&supp_mask)
                .map_collect(|&s, &suppressed| if suppressed { 0.0 } else { s });
            let new_max_mask = is_local_max(&supp_scores);
            Zip::from(&mut max_mask)
                .and(&new_max_mask)
                .and(&supp_mask)
                .for_each(|m, &new_max, &suppressed| *m = *m || (new_max && !suppressed));
        }

        Zip::from(scores)
            .and(&max_mask)
            .map_collect(|&s, &keep| if keep { s } else { 0.0 })
    }

    /// Positions scoring strictly above `threshold`, in row-major order
    pub fn threshold_keypoints(scores: &Array2<f32>, threshold: f32) -> Vec<ScoredKeypoint> {
        scores
            .indexed_iter()
            .filter(|&(_, &s)| s > threshold)
            .map(|((y, x), &score)| ScoredKeypoint {
                keypoint: Keypoint::new(x as f32, y as f32),
                score,
            })
            .collect()
    }

    /// Drop keypoints closer than `border` pixels to any edge
    pub fn remove_borders(
        keypoints: Vec<ScoredKeypoint>,
        border: usize,
        height: usize,
        width: usize,
    ) -> Vec<ScoredKeypoint> {
        let (border, height, width) = (border as f32, height as f32, width as f32);
        keypoints
            .into_iter()
            .filter(|sk| {
                let Keypoint { x, y } = sk.keypoint;
                y >= border && y < height - border && x >= border && x < width - border
            })
            .collect()
    }

    /// Keep the `k` best keypoints, sorted by descending score. Inputs with at
    /// most `k` entries come back untouched.
    pub fn top_k(mut keypoints: Vec<ScoredKeypoint>, limit: KeypointLimit) -> Vec<ScoredKeypoint> {
        let k = match limit {
            KeypointLimit::TopK(k) if k < keypoints.len() => k,
            _ => return keypoints,
        };
        keypoints.sort_by(|a, b| b.score.total_cmp(&a.score));
        keypoints.truncate(k);
        keypoints
    }
}
