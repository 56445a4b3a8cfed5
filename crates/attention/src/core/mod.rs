//! Types shared by the self- and cross-attention layers.
//!
//! Activations use the `(batch, seq_len, features)` layout. Inside a forward
//! pass heads are split into `(batch, num_heads, seq_len, head_dim)` and the
//! transient score tensor is `(batch, num_heads, q_len, k_len)`.

pub mod config;
pub mod errors;
pub mod params;

use candle_core::Tensor;

pub use config::{CrossAttentionConfig, HeadLayout, SelfAttentionConfig};
pub use errors::AttentionError;
pub use params::AttentionWeights;

/// Result of one attention computation.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Attended values. Layout depends on the producer; the layers return
    /// `(batch, q_len, out_dim)`.
    pub output: Tensor,
    /// Post-softmax probabilities, `(batch, num_heads, q_len, k_len)`.
    pub weights: Tensor,
}
