use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use ndarray::{Array1, Array2, ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{ParamError, ParamResult};

/// On-disk record of one tensor
#[derive(Serialize, Deserialize)]
struct NamedTensor {
    name: String,
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Immutable-after-load store of pretrained network parameters, keyed by the
/// layer names of the original networks (`conv1a.weight`, `bin_score`, ...).
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a parameter file written by [`ParamStore::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> ParamResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ParamError::NotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|source| ParamError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_bytes(&bytes)?;
        debug!("Loaded {} tensors from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> ParamResult<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|source| ParamError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> ParamResult<Self> {
        let (named, read): (Vec<NamedTensor>, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        if read != bytes.len() {
            return Err(ParamError::TrailingBytes(bytes.len() - read));
        }

        let mut store = Self::new();
        for tensor in named {
            let len = tensor.data.len();
            let array = ArrayD::from_shape_vec(IxDyn(&tensor.shape), tensor.data).map_err(|_| {
                ParamError::InconsistentTensor {
                    name: tensor.name.clone(),
                    shape: tensor.shape.clone(),
                    len,
                }
            })?;
            store.tensors.insert(tensor.name, array);
        }
        Ok(store)
    }

    pub fn to_bytes(&self) -> ParamResult<Vec<u8>> {
        let named: Vec<NamedTensor> = self
            .tensors
            .iter()
            .map(|(name, array)| NamedTensor {
                name: name.clone(),
                shape: array.shape().to_vec(),
                data: array.iter().copied().collect(),
            })
            .collect();
        Ok(bincode::serde::encode_to_vec(&named, bincode::config::standard())?)
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn insert_scalar(&mut self, name: impl Into<String>, value: f32) {
        self.insert(name, ArrayD::from_elem(IxDyn(&[]), value));
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> ParamResult<&ArrayD<f32>> {
        self.tensors
            .get(name)
            .ok_or_else(|| ParamError::MissingTensor(name.to_string()))
    }

    /// Fetch a tensor whose shape equals `expected` up to trailing unit axes,
    /// so conv1d kernels `[out, in, 1]` and 1x1 conv2d kernels `[out, in, 1, 1]`
    /// both read as `[out, in]`.
    fn shaped(&self, name: &str, expected: &[usize]) -> ParamResult<ArrayD<f32>> {
        let tensor = self.get(name)?;
        let actual = tensor.shape();
        let compatible = actual.len() >= expected.len()
            && actual[..expected.len()] == *expected
            && actual[expected.len()..].iter().all(|&d| d == 1);
        if !compatible {
            return Err(ParamError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        tensor
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(expected))
            .map_err(|_| ParamError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            })
    }

    pub fn scalar(&self, name: &str) -> ParamResult<f32> {
        let tensor = self.shaped(name, &[])?;
        Ok(tensor.iter().next().copied().unwrap_or_default())
    }

    pub fn vector(&self, name: &str, len: usize) -> ParamResult<Array1<f32>> {
        let tensor = self.shaped(name, &[len])?;
        Ok(Array1::from_iter(tensor.iter().copied()))
    }

    pub fn matrix(&self, name: &str, rows: usize, cols: usize) -> ParamResult<Array2<f32>> {
        self.fixed(name, &[rows, cols])
    }

    /// Square convolution kernel `[out, in, k, k]` flattened to `[out, in * k * k]`,
    /// column index `(c * k + ky) * k + kx`
    pub fn conv_kernel(&self, name: &str, out: usize, input: usize, k: usize) -> ParamResult<Array2<f32>> {
        let tensor = self.shaped(name, &[out, input, k, k])?;
        let actual = tensor.shape().to_vec();
        tensor
            .into_shape_with_order((out, input * k * k))
            .map_err(|_| ParamError::ShapeMismatch {
                name: name.to_string(),
                expected: vec![out, input, k, k],
                actual,
            })
    }

    fn fixed<D: Dimension>(&self, name: &str, expected: &[usize]) -> ParamResult<ndarray::Array<f32, D>> {
        let tensor = self.shaped(name, expected)?;
        let actual = tensor.shape().to_vec();
        tensor
            .into_dimensionality::<D>()
            .map_err(|_| ParamError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                actual,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn sample_store() -> ParamStore {
        let mut store = ParamStore::new();
        store.insert("proj.weight", arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn());
        store.insert("proj.bias", arr1(&[0.5, -0.5]).into_dyn());
        store.insert_scalar("bin_score", 1.0);
        store
    }

    #[test]
    fn test_bytes_round_trip() {
        let store = sample_store();
        let bytes = store.to_bytes().unwrap();
        let back = ParamStore::from_bytes(&bytes).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.matrix("proj.weight", 2, 2).unwrap(), arr2(&[[1.0, 2.0], [3.0, 4.0]]));
        assert_eq!(back.scalar("bin_score").unwrap(), 1.0);
    }

    #[test]
    fn test_trailing_unit_axes_accepted() {
        let mut store = ParamStore::new();
        store.insert("conv.weight", ArrayD::from_elem(IxDyn(&[3, 2, 1]), 0.25));
        let m = store.matrix("conv.weight", 3, 2).unwrap();
        assert_eq!(m.dim(), (3, 2));
        assert!(m.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn test_shape_mismatch_reported() {
        let store = sample_store();
        let err = store.vector("proj.bias", 3).unwrap_err();
        assert!(matches!(err, ParamError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_conv_kernel_flattening() {
        let mut store = ParamStore::new();
        let kernel = ArrayD::from_shape_fn(IxDyn(&[2, 3, 3, 3]), |ix| {
            (ix[0] * 1000 + ix[1] * 100 + ix[2] * 10 + ix[3]) as f32
        });
        store.insert("conv.weight", kernel);
        let m = store.conv_kernel("conv.weight", 2, 3, 3).unwrap();
        assert_eq!(m.dim(), (2, 27));
        // out 1, in 2, ky 1, kx 0
        assert_eq!(m[[1, (2 * 3 + 1) * 3]], 1210.0);
    }

    #[test]
    fn test_missing_tensor() {
        let store = sample_store();
        assert!(matches!(store.vector("nope", 1), Err(ParamError::MissingTensor(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ParamStore::load(dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, ParamError::NotFound(_)));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bin");
        std::fs::write(&path, [0xFFu8; 7]).unwrap();
        assert!(ParamStore::load(&path).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        sample_store().save(&path).unwrap();
        let back = ParamStore::load(&path).unwrap();
        assert_eq!(back.vector("proj.bias", 2).unwrap(), arr1(&[0.5, -0.5]));
    }
}
