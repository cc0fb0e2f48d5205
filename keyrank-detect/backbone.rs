//! VGG-style shared encoder with the interest-point and descriptor heads.

use keyrank_core::nn::{Conv1x1, l2_normalize_inplace, relu_inplace, softmax_inplace};
use keyrank_core::{GrayImage, ParamResult, ParamStore};
use ndarray::{Array1, Array2, Axis, s};
use rayon::prelude::*;

use crate::types::FeatureMap;

/// Side length of one detector cell
pub const CELL: usize = 8;

/// Channels of the detector head: one per cell pixel plus the "no keypoint" bin
pub const DETECTOR_CHANNELS: usize = CELL * CELL + 1;

const HEAD_CHANNELS: usize = 256;
const ENCODER_OUT: usize = 128;

/// Encoder convolutions `(name, input, output)`; a 2x2 max pool follows every
/// layer listed in `POOL_AFTER`
const ENCODER: [(&str, usize, usize); 8] = [
    ("conv1a", 1, 64),
    ("conv1b", 64, 64),
    ("conv2a", 64, 64),
    ("conv2b", 64, 64),
    ("conv3a", 64, 128),
    ("conv3b", 128, 128),
    ("conv4a", 128, 128),
    ("conv4b", 128, 128),
];
const POOL_AFTER: [&str; 3] = ["conv1b", "conv2b", "conv3b"];

/// 3x3 convolution with zero padding 1, stride 1
#[derive(Debug, Clone)]
pub struct Conv3x3 {
    /// `[out, in * 9]`, column `(c * 3 + ky) * 3 + kx`
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Conv3x3 {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Self {
        assert_eq!(weight.nrows(), bias.len(), "bias length must match output channels");
        assert_eq!(weight.ncols() % 9, 0, "kernel columns must be a multiple of 9");
        Self { weight, bias }
    }

    pub fn load(store: &ParamStore, prefix: &str, input: usize, output: usize) -> ParamResult<Self> {
        let weight = store.conv_kernel(&format!("{prefix}.weight"), output, input, 3)?;
        let bias = store.vector(&format!("{prefix}.bias"), output)?;
        Ok(Self { weight, bias })
    }

    pub fn input_channels(&self) -> usize {
        self.weight.ncols() / 9
    }

    pub fn output_channels(&self) -> usize {
        self.weight.nrows()
    }

    /// Each output row is computed from its own `[in * 9, W]` patch matrix,
    /// rows run in parallel.
    pub fn forward(&self, x: &FeatureMap) -> FeatureMap {
        let (height, width) = (x.height, x.width);
        let rows: Vec<Array2<f32>> = (0..height)
            .into_par_iter()
            .map(|y| {
                let patches = self.row_patches(x, y);
                let mut out = self.weight.dot(&patches);
                out += &self.bias.view().insert_axis(Axis(1));
                out
            })
            .collect();

        let mut data = Array2::<f32>::zeros((self.output_channels(), height * width));
        for (y, row) in rows.into_iter().enumerate() {
            data.slice_mut(s![.., y * width..(y + 1) * width]).assign(&row);
        }
        FeatureMap::new(data, height, width)
    }

    fn row_patches(&self, x: &FeatureMap, y: usize) -> Array2<f32> {
        let width = x.width;
        let mut patches = Array2::<f32>::zeros((self.input_channels() * 9, width));
        for c in 0..self.input_channels() {
            let channel = x.data.row(c);
            for ky in 0..3 {
                let Some(yy) = (y + ky).checked_sub(1).filter(|&yy| yy < x.height) else {
                    continue;
                };
                let src = channel.slice(s![yy * width..(yy + 1) * width]);
                for kx in 0..3 {
                    let mut dst = patches.row_mut((c * 3 + ky) * 3 + kx);
                    for xo in 0..width {
                        if let Some(xx) = (xo + kx).checked_sub(1).filter(|&xx| xx < width) {
                            dst[xo] = src[xx];
                        }
                    }
                }
            }
        }
        patches
    }
}

/// 2x2 max pooling, stride 2; a trailing odd row or column is dropped
pub fn max_pool2x2(x: &FeatureMap) -> FeatureMap {
    let (height, width) = (x.height / 2, x.width / 2);
    let data = Array2::from_shape_fn((x.channels(), height * width), |(c, i)| {
        let (y, xo) = (2 * (i / width), 2 * (i % width));
        x.at(c, y, xo)
            .max(x.at(c, y, xo + 1))
            .max(x.at(c, y + 1, xo))
            .max(x.at(c, y + 1, xo + 1))
    });
    FeatureMap::new(data, height, width)
}

fn relu(mut x: FeatureMap) -> FeatureMap {
    relu_inplace(&mut x.data);
    x
}

fn pointwise(conv: &Conv1x1, x: &FeatureMap) -> FeatureMap {
    FeatureMap::new(conv.forward(x.data.view()), x.height, x.width)
}

/// Raw network outputs at cell resolution
#[derive(Debug, Clone)]
pub struct BackboneOutput {
    /// `[65, Hc * Wc]` detector logits
    pub logits: FeatureMap,
    /// `[D, Hc * Wc]` descriptor field, unit norm per cell
    pub descriptors: FeatureMap,
}

#[derive(Debug, Clone)]
pub struct Backbone {
    encoder: Vec<(Conv3x3, bool)>,
    detector_hidden: Conv3x3,
    detector_out: Conv1x1,
    descriptor_hidden: Conv3x3,
    descriptor_out: Conv1x1,
}

impl Backbone {
    pub fn load(store: &ParamStore, descriptor_dim: usize) -> ParamResult<Self> {
        let encoder = ENCODER
            .iter()
            .map(|&(name, input, output)| {
                Conv3x3::load(store, name, input, output).map(|conv| (conv, POOL_AFTER.contains(&name)))
            })
            .collect::<ParamResult<Vec<_>>>()?;

        Ok(Self {
            encoder,
            detector_hidden: Conv3x3::load(store, "convPa", ENCODER_OUT, HEAD_CHANNELS)?,
            detector_out: Conv1x1::load(store, "convPb", HEAD_CHANNELS, DETECTOR_CHANNELS)?,
            descriptor_hidden: Conv3x3::load(store, "convDa", ENCODER_OUT, HEAD_CHANNELS)?,
            descriptor_out: Conv1x1::load(store, "convDb", HEAD_CHANNELS, descriptor_dim)?,
        })
    }

    /// Names and shapes of every parameter tensor the backbone reads
    pub fn tensor_specs(descriptor_dim: usize) -> Vec<(String, Vec<usize>)> {
        let mut convs: Vec<(&str, usize, usize, usize)> =
            ENCODER.iter().map(|&(name, input, output)| (name, input, output, 3)).collect();
        convs.extend([
            ("convPa", ENCODER_OUT, HEAD_CHANNELS, 3),
            ("convPb", HEAD_CHANNELS, DETECTOR_CHANNELS, 1),
            ("convDa", ENCODER_OUT, HEAD_CHANNELS, 3),
            ("convDb", HEAD_CHANNELS, descriptor_dim, 1),
        ]);
        convs
            .into_iter()
            .flat_map(|(name, input, output, k)| {
                [
                    (format!("{name}.weight"), vec![output, input, k, k]),
                    (format!("{name}.bias"), vec![output]),
                ]
            })
            .collect()
    }

    pub fn descriptor_dim(&self) -> usize {
        self.descriptor_out.output_channels()
    }

    /// Run the network on one image.
    ///
    /// # Panics
    /// If the sample buffer is shorter than `width * height`; the detector
    /// validates images before calling this.
    pub fn forward(&self, image: &GrayImage) -> BackboneOutput {
        let input = Array2::from_shape_fn((1, image.width * image.height), |(_, i)| image.data[i]);
        let mut x = FeatureMap::new(input, image.height, image.width);

        for (conv, pool) in &self.encoder {
            x = relu(conv.forward(&x));
            if *pool {
                x = max_pool2x2(&x);
            }
        }

        let hidden = relu(self.detector_hidden.forward(&x));
        let logits = pointwise(&self.detector_out, &hidden);

        let hidden = relu(self.descriptor_hidden.forward(&x));
        let mut descriptors = pointwise(&self.descriptor_out, &hidden);
        l2_normalize_inplace(&mut descriptors.data, Axis(0));

        BackboneOutput { logits, descriptors }
    }

    /// Per-cell softmax over the 65 logits, dustbin dropped, scattered to a
    /// `[8 * Hc, 8 * Wc]` probability map
    pub fn scores_from_logits(logits: &FeatureMap) -> Array2<f32> {
        let mut probs = logits.data.clone();
        softmax_inplace(&mut probs, Axis(0));

        let (hc, wc) = (logits.height, logits.width);
        Array2::from_shape_fn((hc * CELL, wc * CELL), |(y, x)| {
            let (cy, i) = (y / CELL, y % CELL);
            let (cx, j) = (x / CELL, x % CELL);
            probs[[i * CELL + j, cy * wc + cx]]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::initial_params;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_conv3x3_identity_kernel_with_padding() {
        // centre tap only: output equals input plus bias
        let mut weight = Array2::<f32>::zeros((1, 9));
        weight[[0, 4]] = 1.0;
        let conv = Conv3x3::new(weight, arr1(&[0.5]));
        let x = FeatureMap::from_fn(1, 3, 4, |_, y, x| (y * 4 + x) as f32);
        let y = conv.forward(&x);
        assert_eq!(y.data, x.data.mapv(|v| v + 0.5));
    }

    #[test]
    fn test_conv3x3_box_filter_counts_neighbours() {
        let conv = Conv3x3::new(Array2::from_elem((1, 9), 1.0), arr1(&[0.0]));
        let x = FeatureMap::from_fn(1, 3, 3, |_, _, _| 1.0);
        let y = conv.forward(&x);
        assert_eq!(y.at(0, 0, 0), 4.0);
        assert_eq!(y.at(0, 0, 1), 6.0);
        assert_eq!(y.at(0, 1, 1), 9.0);
    }

    #[test]
    fn test_max_pool2x2_floors_odd_sizes() {
        let x = FeatureMap::from_fn(1, 3, 5, |_, y, x| (y * 5 + x) as f32);
        let pooled = max_pool2x2(&x);
        assert_eq!((pooled.height, pooled.width), (1, 2));
        assert_eq!(pooled.at(0, 0, 0), 6.0);
        assert_eq!(pooled.at(0, 0, 1), 8.0);
    }

    #[test]
    fn test_uniform_logits_spread_probability() {
        let logits = FeatureMap::from_fn(DETECTOR_CHANNELS, 2, 3, |_, _, _| 0.0);
        let scores = Backbone::scores_from_logits(&logits);
        assert_eq!(scores.dim(), (16, 24));
        for &s in scores.iter() {
            assert_abs_diff_eq!(s, 1.0 / 65.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_logit_channel_maps_to_cell_pixel() {
        // channel 8 * 3 + 5 of cell (cy=1, cx=0) lands on pixel (y=11, x=5)
        let logits = FeatureMap::from_fn(DETECTOR_CHANNELS, 2, 2, |c, y, x| {
            if c == 29 && y == 1 && x == 0 { 20.0 } else { 0.0 }
        });
        let scores = Backbone::scores_from_logits(&logits);
        let (y, x) = scores
            .indexed_iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(ix, _)| ix)
            .unwrap();
        assert_eq!((y, x), (11, 5));
        assert!(scores[[11, 5]] > 0.99);
    }

    #[test]
    fn test_tensor_specs_cover_loaded_layers() {
        let specs = Backbone::tensor_specs(32);
        assert_eq!(specs.len(), 24);
        assert!(specs.contains(&("convPb.weight".to_string(), vec![65, 256, 1, 1])));
        assert!(specs.contains(&("convDb.bias".to_string(), vec![32])));
    }

    #[test]
    fn test_forward_shapes_and_unit_descriptors() {
        let store = initial_params(16, 7);
        let backbone = Backbone::load(&store, 16).unwrap();
        assert_eq!(backbone.descriptor_dim(), 16);

        let image = GrayImage::from_fn(16, 24, |x, y| ((x * 7 + y * 3) % 11) as f32 / 10.0);
        let out = backbone.forward(&image);
        assert_eq!((out.logits.channels(), out.logits.height, out.logits.width), (65, 3, 2));
        assert_eq!((out.descriptors.channels(), out.descriptors.height, out.descriptors.width), (16, 3, 2));
        for col in out.descriptors.data.columns() {
            let norm = col.dot(&col).sqrt();
            assert!(norm < 1e-6 || (norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_load_reports_missing_layer() {
        let full = initial_params(16, 1);
        let mut pruned = ParamStore::new();
        for name in full.names().filter(|n| !n.starts_with("convDa")) {
            pruned.insert(name, full.get(name).unwrap().clone());
        }
        let err = Backbone::load(&pruned, 16).unwrap_err();
        assert!(matches!(err, keyrank_core::ParamError::MissingTensor(name) if name == "convDa.weight"));
    }
}
