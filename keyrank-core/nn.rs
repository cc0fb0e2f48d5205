//! Pointwise network building blocks shared by the detector heads and the
//! matcher. Features are laid out channel-major: `C x N` matrices where each
//! column is one position (pixel or keypoint).

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::ParamResult;
use crate::params::ParamStore;

const BATCH_NORM_EPS: f32 = 1e-5;
const NORMALIZE_EPS: f32 = 1e-12;

/// Kernel-size-1 convolution, i.e. a shared linear map applied per column
#[derive(Debug, Clone)]
pub struct Conv1x1 {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Conv1x1 {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Self {
        assert_eq!(weight.nrows(), bias.len(), "bias length must match output channels");
        Self { weight, bias }
    }

    /// Load `{prefix}.weight` (`[out, in]` or `[out, in, 1(, 1)]`) and `{prefix}.bias`
    pub fn load(store: &ParamStore, prefix: &str, input: usize, output: usize) -> ParamResult<Self> {
        let weight = store.matrix(&format!("{prefix}.weight"), output, input)?;
        let bias = store.vector(&format!("{prefix}.bias"), output)?;
        Ok(Self { weight, bias })
    }

    pub fn input_channels(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_channels(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut y = self.weight.dot(&x);
        y += &self.bias.view().insert_axis(Axis(1));
        y
    }
}

/// Batch normalization with frozen running statistics, folded into a
/// per-channel affine map
#[derive(Debug, Clone)]
pub struct BatchNorm {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl BatchNorm {
    pub fn load(store: &ParamStore, prefix: &str, channels: usize) -> ParamResult<Self> {
        let gamma = store.vector(&format!("{prefix}.weight"), channels)?;
        let beta = store.vector(&format!("{prefix}.bias"), channels)?;
        let mean = store.vector(&format!("{prefix}.running_mean"), channels)?;
        let var = store.vector(&format!("{prefix}.running_var"), channels)?;

        let scale = &gamma / &var.mapv(|v| (v + BATCH_NORM_EPS).sqrt());
        let shift = &beta - &(&mean * &scale);
        Ok(Self { scale, shift })
    }

    pub fn apply(&self, x: &mut Array2<f32>) {
        for ((mut row, &scale), &shift) in x.rows_mut().into_iter().zip(&self.scale).zip(&self.shift) {
            row.mapv_inplace(|v| v * scale + shift);
        }
    }
}

#[derive(Debug, Clone)]
struct MlpLayer {
    conv: Conv1x1,
    norm: Option<BatchNorm>,
}

/// Multi-layer perceptron of pointwise convolutions. Hidden layers are
/// conv -> batch-norm -> ReLU, the last layer is a bare conv.
///
/// Parameters follow sequential-container numbering: hidden layer `i` owns
/// `{prefix}.{3i}` (conv) and `{prefix}.{3i+1}` (batch-norm).
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<MlpLayer>,
}

impl Mlp {
    pub fn load(store: &ParamStore, prefix: &str, channels: &[usize]) -> ParamResult<Self> {
        let n = channels.len();
        let mut layers = Vec::with_capacity(n.saturating_sub(1));
        for i in 1..n {
            let index = 3 * (i - 1);
            let conv = Conv1x1::load(store, &format!("{prefix}.{index}"), channels[i - 1], channels[i])?;
            let norm = if i < n - 1 {
                Some(BatchNorm::load(store, &format!("{prefix}.{}", index + 1), channels[i])?)
            } else {
                None
            };
            layers.push(MlpLayer { conv, norm });
        }
        Ok(Self { layers })
    }

    /// Tensor names (without `.weight`/`.bias` suffixes) for the given channel list
    pub fn layer_prefixes(prefix: &str, channels: &[usize]) -> Vec<(String, Option<String>)> {
        let n = channels.len();
        (1..n)
            .map(|i| {
                let index = 3 * (i - 1);
                let norm = (i < n - 1).then(|| format!("{prefix}.{}", index + 1));
                (format!("{prefix}.{index}"), norm)
            })
            .collect()
    }

    pub fn output_channels(&self) -> usize {
        self.layers.last().map_or(0, |l| l.conv.output_channels())
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut iter = self.layers.iter();
        let Some(first) = iter.next() else {
            return x.to_owned();
        };
        let mut y = Self::apply_layer(first, x);
        for layer in iter {
            y = Self::apply_layer(layer, y.view());
        }
        y
    }

    fn apply_layer(layer: &MlpLayer, x: ArrayView2<f32>) -> Array2<f32> {
        let mut y = layer.conv.forward(x);
        if let Some(norm) = &layer.norm {
            norm.apply(&mut y);
            relu_inplace(&mut y);
        }
        y
    }
}

pub fn relu_inplace(x: &mut Array2<f32>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// Numerically stable softmax along `axis`
pub fn softmax_inplace(x: &mut Array2<f32>, axis: Axis) {
    for mut lane in x.lanes_mut(axis) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
}

/// Scale every lane along `axis` to unit L2 norm (norm clamped below at 1e-12)
pub fn l2_normalize_inplace(x: &mut Array2<f32>, axis: Axis) {
    for mut lane in x.lanes_mut(axis) {
        let norm = lane.dot(&lane).sqrt().max(NORMALIZE_EPS);
        lane.mapv_inplace(|v| v / norm);
    }
}

/// `ln(sum(exp(v)))` without overflow
pub fn log_sum_exp<I: IntoIterator<Item = f32> + Clone>(values: I) -> f32 {
    let max = values.clone().into_iter().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return f32::NEG_INFINITY;
    }
    let sum: f32 = values.into_iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}
