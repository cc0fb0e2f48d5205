//! Keypoint matching between two images: positional encoding, an attentional
//! graph network over both keypoint sets, and a Sinkhorn optimal-transport
//! assignment with dustbins for unmatched points.

pub mod attention;
pub mod builder;
pub mod config;
pub mod encoder;
pub mod error;
pub mod init;
pub mod matcher;
pub mod transport;

pub use attention::{AttentionalGnn, AttentionalPropagation, MultiHeadAttention};
pub use builder::MatcherBuilder;
pub use config::{LayerKind, MatcherConfig, NUM_HEADS, WeightsVariant};
pub use encoder::{KeypointEncoder, normalize_keypoints};
pub use error::{MatchError, MatchResult};
pub use matcher::Matcher;
pub use transport::{log_optimal_transport, log_sinkhorn_iterations, mutual_matches};
