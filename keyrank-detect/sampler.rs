use keyrank_core::{Descriptor, Keypoint};
use rayon::prelude::*;

use crate::types::FeatureMap;

const NORMALIZE_EPS: f32 = 1e-12;

/// Samples a coarse descriptor field at full-resolution keypoint locations
pub struct DescriptorSampler {
    stride: usize,
}

impl DescriptorSampler {
    pub fn new(stride: usize) -> Self {
        assert!(stride > 0);
        Self { stride }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Map a pixel coordinate to the normalized `[-1, 1]` grid of a field axis
    /// with `cells` entries. The first cell centre `s/2 - 0.5` maps to -1 and
    /// `cells * s - 1` maps to 1, matching what the pretrained descriptor head
    /// was trained with.
    pub fn to_grid(&self, p: f32, cells: usize) -> f32 {
        let s = self.stride as f32;
        let span = cells as f32 * s - s / 2.0 - 0.5;
        ((p - s / 2.0 + 0.5) / span) * 2.0 - 1.0
    }

    /// Bilinearly interpolate the field at each keypoint and L2-normalize
    pub fn sample(&self, keypoints: &[Keypoint], field: &FeatureMap) -> Vec<Descriptor> {
        keypoints
            .par_iter()
            .map(|kp| {
                let gx = self.to_grid(kp.x, field.width);
                let gy = self.to_grid(kp.y, field.height);
                let mut d = Self::bilinear_sample(field, gx, gy);
                let norm = d.iter().map(|v| v * v).sum::<f32>().sqrt().max(NORMALIZE_EPS);
                d.iter_mut().for_each(|v| *v /= norm);
                d
            })
            .collect()
    }

    /// Grid sampling with corner-aligned coordinates; taps outside the field
    /// contribute zero
    fn bilinear_sample(field: &FeatureMap, gx: f32, gy: f32) -> Vec<f32> {
        let ix = (gx + 1.0) / 2.0 * (field.width as f32 - 1.0);
        let iy = (gy + 1.0) / 2.0 * (field.height as f32 - 1.0);

        let x0 = ix.floor();
        let y0 = iy.floor();
        let fx = ix - x0;
        let fy = iy - y0;

        let taps = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x0 + 1.0, y0, fx * (1.0 - fy)),
            (x0, y0 + 1.0, (1.0 - fx) * fy),
            (x0 + 1.0, y0 + 1.0, fx * fy),
        ];

        let mut out = vec![0.0f32; field.channels()];
        for (tx, ty, weight) in taps {
            if weight == 0.0 || tx < 0.0 || ty < 0.0 {
                continue;
            }
            let (tx, ty) = (tx as usize, ty as usize);
            if tx >= field.width || ty >= field.height {
                continue;
            }
            for (o, &v) in out.iter_mut().zip(field.column(ty, tx)) {
                *o += weight * v;
            }
        }
        out
    }
}
