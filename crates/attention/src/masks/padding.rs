//! Padding masks that hide trailing or flagged key positions.
//!
//! Both builders return `(batch, 1, 1, k_len)` so the mask broadcasts over
//! heads and query positions.

use candle_core::{Device, Error, Result, Tensor};

use super::MASK_DTYPE;

/// Keeps the first `lengths[b]` keys of each batch element.
///
/// Lengths longer than `k_len` are clamped.
pub fn padding_mask_from_lengths(
    device: &Device,
    lengths: &[usize],
    k_len: usize,
) -> Result<Tensor> {
    let data: Vec<u8> = lengths
        .iter()
        .flat_map(|&valid| {
            let valid = valid.min(k_len);
            (0..k_len).map(move |k| u8::from(k < valid))
        })
        .collect();
    Tensor::from_vec(data, (lengths.len(), 1, 1, k_len), device)
}

/// Builds a mask from per-batch padding flags, where `true` marks a padded key.
///
/// All rows must share the same length.
pub fn padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let Some(first) = padding.first() else {
        return Tensor::zeros((0, 1, 1, 0), MASK_DTYPE, device);
    };
    let k_len = first.len();
    if let Some(row) = padding.iter().find(|row| row.len() != k_len) {
        return Err(Error::Msg(format!(
            "all padding rows must share k_len {k_len}, found a row of {}",
            row.len()
        )));
    }

    let data: Vec<u8> = padding
        .iter()
        .flat_map(|row| row.iter().map(|&is_padding| u8::from(!is_padding)))
        .collect();
    Tensor::from_vec(data, (padding.len(), 1, 1, k_len), device)
}
