//! Explicit parameter bundles for constructing layers from existing weights.

use candle_core::Tensor;

/// The four projection matrices of an attention layer.
///
/// Every matrix is stored `(out_features, in_features)`:
///
/// * `query`, `key`: `(num_heads * k_dim, in)`
/// * `value`: `(num_heads * v_dim, in)`
/// * `output`: `(out, num_heads * v_dim)`
///
/// `output_bias`, when present, has length `out`. A missing bias is treated as
/// zero.
#[derive(Debug, Clone)]
pub struct AttentionWeights {
    pub query: Tensor,
    pub key: Tensor,
    pub value: Tensor,
    pub output: Tensor,
    pub output_bias: Option<Tensor>,
}
