//! Freshly initialized matcher parameters, for tests, benchmarks and
//! bootstrapping a parameter file without the pretrained weights.

use keyrank_core::ParamStore;
use keyrank_core::nn::Mlp;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::attention::{AttentionalGnn, AttentionalPropagation, MultiHeadAttention};
use crate::config::MatcherConfig;
use crate::encoder::KeypointEncoder;
use crate::error::MatchResult;

/// Uniform `[-1/sqrt(fan_in), 1/sqrt(fan_in))` convolutions, identity
/// batch-norm statistics, zero bias on the last layer of every MLP and a unit
/// dustbin score
pub fn initial_params(config: &MatcherConfig, seed: u64) -> MatchResult<ParamStore> {
    config.validate()?;
    let dim = config.descriptor_dim;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = ParamStore::new();

    insert_mlp(&mut store, &mut rng, KeypointEncoder::layer_prefixes(&config.encoder_channels()), &config.encoder_channels());

    for i in 0..config.gnn_layers.len() {
        let prefix = AttentionalGnn::layer_prefix(i);
        for conv in MultiHeadAttention::conv_prefixes(&format!("{prefix}.attn")) {
            insert_conv(&mut store, &mut rng, &conv, dim, dim, false);
        }
        let channels = AttentionalPropagation::mlp_channels(dim);
        insert_mlp(&mut store, &mut rng, Mlp::layer_prefixes(&format!("{prefix}.mlp"), &channels), &channels);
    }

    insert_conv(&mut store, &mut rng, "final_proj", dim, dim, false);
    store.insert_scalar("bin_score", 1.0);
    Ok(store)
}

fn insert_mlp(store: &mut ParamStore, rng: &mut StdRng, prefixes: Vec<(String, Option<String>)>, channels: &[usize]) {
    let last = prefixes.len().saturating_sub(1);
    for (i, (conv, norm)) in prefixes.into_iter().enumerate() {
        insert_conv(store, rng, &conv, channels[i], channels[i + 1], i == last);
        if let Some(norm) = norm {
            let n = channels[i + 1];
            store.insert(format!("{norm}.weight"), Array1::<f32>::ones(n).into_dyn());
            store.insert(format!("{norm}.bias"), Array1::<f32>::zeros(n).into_dyn());
            store.insert(format!("{norm}.running_mean"), Array1::<f32>::zeros(n).into_dyn());
            store.insert(format!("{norm}.running_var"), Array1::<f32>::ones(n).into_dyn());
        }
    }
}

fn insert_conv(store: &mut ParamStore, rng: &mut StdRng, prefix: &str, input: usize, output: usize, zero_bias: bool) {
    let bound = 1.0 / (input.max(1) as f32).sqrt();
    let weight = Array2::from_shape_simple_fn((output, input), || rng.random_range(-bound..bound));
    let bias = if zero_bias {
        Array1::zeros(output)
    } else {
        Array1::from_shape_simple_fn(output, || rng.random_range(-bound..bound))
    };
    store.insert(format!("{prefix}.weight"), weight.into_dyn());
    store.insert(format!("{prefix}.bias"), bias.into_dyn());
}
