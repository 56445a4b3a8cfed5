//! Broadcast validation and the masked-fill applied to raw scores.

use candle_core::Tensor;

use super::MASK_FILL_VALUE;
use crate::core::AttentionError;

/// Checks that `mask` broadcasts to `target` under Candle's rules: missing
/// leading axes are added and size-1 axes are stretched.
pub fn ensure_broadcastable(mask: &Tensor, target: &[usize]) -> Result<(), AttentionError> {
    let dims = mask.dims();
    let compatible = dims.len() <= target.len()
        && dims
            .iter()
            .rev()
            .zip(target.iter().rev())
            .all(|(&m, &t)| m == t || m == 1);
    if compatible {
        Ok(())
    } else {
        Err(AttentionError::shape(format!(
            "mask shape {dims:?} is not broadcastable to scores {target:?}"
        )))
    }
}

/// Replaces every score whose mask entry is zero with [`MASK_FILL_VALUE`].
///
/// Must run before softmax. The returned tensor has the shape and dtype of
/// `scores`.
pub fn apply_mask(scores: &Tensor, mask: &Tensor) -> Result<Tensor, AttentionError> {
    if !scores.device().same_device(mask.device()) {
        return Err(AttentionError::shape("mask must reside on the same device as the scores"));
    }
    ensure_broadcastable(mask, scores.dims())?;

    let keep = mask.ne(&mask.zeros_like()?)?.broadcast_as(scores.dims())?;
    let fill = Tensor::new(MASK_FILL_VALUE, scores.device())?
        .to_dtype(scores.dtype())?
        .broadcast_as(scores.dims())?;
    Ok(keep.where_cond(scores, &fill)?)
}
