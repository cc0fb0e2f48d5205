//! Multi-head attention and the alternating self/cross graph network that
//! refines the descriptors of both images.

use keyrank_core::nn::{Conv1x1, Mlp, softmax_inplace};
use keyrank_core::{ParamResult, ParamStore};
use ndarray::{Array2, Axis, concatenate, s};
use rayon::prelude::*;

use crate::config::LayerKind;

/// Multi-head dot-product attention over `D x N` features.
///
/// Channel `c` belongs to head `c % heads` at position `c / heads`, so each
/// head reads a strided row slice of the projected features.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    heads: usize,
    query: Conv1x1,
    key: Conv1x1,
    value: Conv1x1,
    merge: Conv1x1,
}

impl MultiHeadAttention {
    pub fn load(store: &ParamStore, prefix: &str, dim: usize, heads: usize) -> ParamResult<Self> {
        Ok(Self {
            heads,
            query: Conv1x1::load(store, &format!("{prefix}.proj.0"), dim, dim)?,
            key: Conv1x1::load(store, &format!("{prefix}.proj.1"), dim, dim)?,
            value: Conv1x1::load(store, &format!("{prefix}.proj.2"), dim, dim)?,
            merge: Conv1x1::load(store, &format!("{prefix}.merge"), dim, dim)?,
        })
    }

    /// Tensor prefixes of the four projections
    pub fn conv_prefixes(prefix: &str) -> Vec<String> {
        vec![
            format!("{prefix}.proj.0"),
            format!("{prefix}.proj.1"),
            format!("{prefix}.proj.2"),
            format!("{prefix}.merge"),
        ]
    }

    /// Messages for every column of `x` gathered from the columns of `source`
    pub fn forward(&self, x: &Array2<f32>, source: &Array2<f32>) -> Array2<f32> {
        let q = self.query.forward(x.view());
        let k = self.key.forward(source.view());
        let v = self.value.forward(source.view());

        let dim = q.nrows();
        let head_dim = dim / self.heads;
        let scale = 1.0 / (head_dim as f32).sqrt();

        let per_head: Vec<Array2<f32>> = (0..self.heads)
            .into_par_iter()
            .map(|h| {
                let qh = q.slice(s![h..;self.heads, ..]);
                let kh = k.slice(s![h..;self.heads, ..]);
                let vh = v.slice(s![h..;self.heads, ..]);
                // [N, M], normalized over source points
                let mut prob = qh.t().dot(&kh) * scale;
                softmax_inplace(&mut prob, Axis(1));
                vh.dot(&prob.t())
            })
            .collect();

        let mut message = Array2::<f32>::zeros((dim, x.ncols()));
        for (h, out) in per_head.into_iter().enumerate() {
            message.slice_mut(s![h..;self.heads, ..]).assign(&out);
        }
        self.merge.forward(message.view())
    }
}

/// Attention followed by an MLP over `[x; message]`, producing a residual update
#[derive(Debug, Clone)]
pub struct AttentionalPropagation {
    attention: MultiHeadAttention,
    mlp: Mlp,
}

impl AttentionalPropagation {
    pub fn load(store: &ParamStore, prefix: &str, dim: usize, heads: usize) -> ParamResult<Self> {
        Ok(Self {
            attention: MultiHeadAttention::load(store, &format!("{prefix}.attn"), dim, heads)?,
            mlp: Mlp::load(store, &format!("{prefix}.mlp"), &Self::mlp_channels(dim))?,
        })
    }

    pub fn mlp_channels(dim: usize) -> [usize; 3] {
        [2 * dim, 2 * dim, dim]
    }

    pub fn forward(&self, x: &Array2<f32>, source: &Array2<f32>) -> Array2<f32> {
        let message = self.attention.forward(x, source);
        let joined = concatenate![Axis(0), x.view(), message.view()];
        self.mlp.forward(joined.view())
    }
}

/// Fixed sequence of attention layers built once from the configuration
#[derive(Debug, Clone)]
pub struct AttentionalGnn {
    layers: Vec<(LayerKind, AttentionalPropagation)>,
}

impl AttentionalGnn {
    pub fn load(store: &ParamStore, dim: usize, heads: usize, kinds: &[LayerKind]) -> ParamResult<Self> {
        let layers = kinds
            .iter()
            .enumerate()
            .map(|(i, &kind)| {
                AttentionalPropagation::load(store, &Self::layer_prefix(i), dim, heads).map(|layer| (kind, layer))
            })
            .collect::<ParamResult<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn layer_prefix(index: usize) -> String {
        format!("gnn.layers.{index}")
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Both sets are updated from the embeddings they had before the layer
    pub fn forward(&self, mut desc0: Array2<f32>, mut desc1: Array2<f32>) -> (Array2<f32>, Array2<f32>) {
        for (kind, layer) in &self.layers {
            let (delta0, delta1) = match kind {
                LayerKind::Cross => rayon::join(|| layer.forward(&desc0, &desc1), || layer.forward(&desc1, &desc0)),
                LayerKind::Intra => rayon::join(|| layer.forward(&desc0, &desc0), || layer.forward(&desc1, &desc1)),
            };
            desc0 += &delta0;
            desc1 += &delta1;
        }
        (desc0, desc1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, arr2};

    fn insert_conv(store: &mut ParamStore, prefix: &str, weight: Array2<f32>) {
        let out = weight.nrows();
        store.insert(format!("{prefix}.weight"), weight.into_dyn());
        store.insert(format!("{prefix}.bias"), Array1::<f32>::zeros(out).into_dyn());
    }

    fn identity_attention(dim: usize, heads: usize) -> MultiHeadAttention {
        let mut store = ParamStore::new();
        for prefix in MultiHeadAttention::conv_prefixes("attn") {
            insert_conv(&mut store, &prefix, Array2::eye(dim));
        }
        MultiHeadAttention::load(&store, "attn", dim, heads).unwrap()
    }

    #[test]
    fn test_single_source_message_is_its_value() {
        let attn = identity_attention(4, 2);
        let x = arr2(&[[1.0, -1.0], [0.5, 0.0], [2.0, 3.0], [0.0, 1.0]]);
        let source = arr2(&[[0.1], [0.2], [0.3], [0.4]]);
        let message = attn.forward(&x, &source);
        assert_eq!(message.dim(), (4, 2));
        for col in message.columns() {
            for (a, b) in col.iter().zip(source.column(0)) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_heads_use_strided_channels() {
        // head 0 owns channels {0, 2}, head 1 owns {1, 3}; the query only
        // separates the two sources on head 0's channels
        let attn = identity_attention(4, 2);
        let x = arr2(&[[10.0], [0.0], [0.0], [0.0]]);
        let source = arr2(&[[1.0, -1.0], [0.0, 0.0], [5.0, 7.0], [2.0, 4.0]]);
        let message = attn.forward(&x, &source);

        // head 0 attends almost entirely to source 0
        assert_abs_diff_eq!(message[[0, 0]], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(message[[2, 0]], 5.0, epsilon = 1e-3);
        // head 1 sees equal scores and averages
        assert_abs_diff_eq!(message[[1, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(message[[3, 0]], 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_zero_layers_leave_descriptors() {
        let mut store = ParamStore::new();
        let dim = 4;
        for prefix in MultiHeadAttention::conv_prefixes("gnn.layers.0.attn") {
            insert_conv(&mut store, &prefix, Array2::eye(dim));
        }
        for (conv, norm) in Mlp::layer_prefixes("gnn.layers.0.mlp", &AttentionalPropagation::mlp_channels(dim)) {
            let (out, input) = if norm.is_some() { (2 * dim, 2 * dim) } else { (dim, 2 * dim) };
            insert_conv(&mut store, &conv, Array2::zeros((out, input)));
            if let Some(norm) = norm {
                store.insert(format!("{norm}.weight"), Array1::<f32>::ones(out).into_dyn());
                store.insert(format!("{norm}.bias"), Array1::<f32>::zeros(out).into_dyn());
                store.insert(format!("{norm}.running_mean"), Array1::<f32>::zeros(out).into_dyn());
                store.insert(format!("{norm}.running_var"), Array1::<f32>::ones(out).into_dyn());
            }
        }

        let gnn = AttentionalGnn::load(&store, dim, 2, &[LayerKind::Cross]).unwrap();
        assert_eq!(gnn.len(), 1);
        let d0 = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]]);
        let d1 = arr2(&[[0.5], [0.5], [0.5], [0.5]]);
        let (o0, o1) = gnn.forward(d0.clone(), d1.clone());
        assert_eq!(o0, d0);
        assert_eq!(o1, d1);
    }
}
