use std::path::PathBuf;

use thiserror::Error;

/// Failures of the pretrained parameter store. All of them leave the network
/// unusable, so callers treat them as fatal for the whole run.
#[derive(Error, Debug)]
pub enum ParamError {
    #[error("Parameter file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read parameter file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt parameter data: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Failed to encode parameters: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Parameter data has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("Tensor '{name}' declares shape {shape:?} but holds {len} values")]
    InconsistentTensor { name: String, shape: Vec<usize>, len: usize },

    #[error("Missing tensor '{0}'")]
    MissingTensor(String),

    #[error("Tensor '{name}' has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

pub type ParamResult<T> = Result<T, ParamError>;
