//! Freshly initialized backbone parameters, for tests, benchmarks and
//! bootstrapping a parameter file without the pretrained weights.

use keyrank_core::ParamStore;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backbone::Backbone;

/// Uniform `[-1/sqrt(fan_in), 1/sqrt(fan_in))` weights and biases, seeded
pub fn initial_params(descriptor_dim: usize, seed: u64) -> ParamStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = ParamStore::new();
    let specs = Backbone::tensor_specs(descriptor_dim);

    for pair in specs.chunks(2) {
        let [(weight_name, weight_shape), (bias_name, bias_shape)] = pair else {
            continue;
        };
        let fan_in: usize = weight_shape[1..].iter().product();
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        store.insert(weight_name.as_str(), uniform(&mut rng, weight_shape, bound));
        store.insert(bias_name.as_str(), uniform(&mut rng, bias_shape, bound));
    }
    store
}

fn uniform(rng: &mut StdRng, shape: &[usize], bound: f32) -> ArrayD<f32> {
    ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.random_range(-bound..bound))
}
