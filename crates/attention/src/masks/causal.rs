//! Causal (look-behind only) masks.

use candle_core::{Device, Result, Tensor};

/// Builds a `(q_len, k_len)` mask allowing each query to see keys up to its
/// own position.
///
/// When `k_len > q_len` the queries are aligned with the most recent `q_len`
/// keys, so the extra prefix stays visible to every query. The result
/// broadcasts over batch and heads.
pub fn causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len);
    let data: Vec<u8> = (0..q_len)
        .flat_map(|q| (0..k_len).map(move |k| u8::from(k <= q + offset)))
        .collect();
    Tensor::from_vec(data, (q_len, k_len), device)
}
