//! Exact `softmax(Q·Kᵗ · scale)·V` over head-split tensors.

use candle_core::{Tensor, D};
use candle_nn::ops::softmax;
use layers::PrecisionPolicy;

use crate::core::{AttentionError, AttentionOutput};
use crate::masks::apply_mask;

/// Computes attention for already split heads.
///
/// * `q`: `(batch, heads, q_len, k_dim)`
/// * `k_t`: `(batch, heads, k_dim, k_len)`, keys with the feature axis first
/// * `v`: `(batch, heads, k_len, v_dim)`
/// * `mask`: broadcastable to `(batch, heads, q_len, k_len)`, zero = excluded
///
/// Scores, softmax and the weighted sum run in the policy's reduction dtype.
/// `output` is `(batch, heads, q_len, v_dim)` in the storage dtype; `weights`
/// stays in the reduction dtype. Every op used here is differentiable in
/// Candle, so gradients flow back to whatever produced `q`, `k_t` and `v`.
pub fn scaled_dot_product_attention(
    q: &Tensor,
    k_t: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    scale: f64,
    policy: &PrecisionPolicy,
) -> Result<AttentionOutput, AttentionError> {
    let device = q.device();
    if !device.same_device(k_t.device()) || !device.same_device(v.device()) {
        return Err(AttentionError::shape("q, k, v must reside on the same device"));
    }

    let (batch, heads, q_len, k_dim) = q
        .dims4()
        .map_err(|_| AttentionError::shape("q must have shape [batch, heads, q_len, k_dim]"))?;
    let (kb, kh, kd, k_len) = k_t
        .dims4()
        .map_err(|_| AttentionError::shape("k_t must have shape [batch, heads, k_dim, k_len]"))?;
    let (vb, vh, vk, _) = v
        .dims4()
        .map_err(|_| AttentionError::shape("v must have shape [batch, heads, k_len, v_dim]"))?;

    if kb != batch || kh != heads || kd != k_dim {
        return Err(AttentionError::shape(format!(
            "k_t shape {:?} does not match q shape {:?}",
            k_t.dims(),
            q.dims()
        )));
    }
    if vb != batch || vh != heads || vk != k_len {
        return Err(AttentionError::shape(format!(
            "v shape {:?} does not match k_t shape {:?}",
            v.dims(),
            k_t.dims()
        )));
    }

    let q = policy.cast_for_reduction(q)?;
    let k_t = policy.cast_for_reduction(k_t)?;
    let v = policy.cast_for_reduction(v)?;

    let mut scores = q.matmul(&k_t)?.affine(scale, 0.0)?;
    if let Some(mask) = mask {
        scores = apply_mask(&scores, mask)?;
    }
    log::trace!(
        "attention scores [{batch}, {heads}, {q_len}, {k_len}] masked={}",
        mask.is_some()
    );

    let weights = softmax(&scores, D::Minus1)?;
    let output = weights.matmul(&v)?;

    Ok(AttentionOutput {
        output: policy.cast_to_storage(&output)?,
        weights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::{causal_mask, MASK_FILL_VALUE};
    use candle_core::{DType, Device, Result as CandleResult};

    fn f32_policy() -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(DType::F32)
    }

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..48).map(|i| ((i * 7) % 11) as f32 * 0.1 - 0.5).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 6), device)?;
        let reversed: Vec<f32> = data.iter().rev().copied().collect();
        let k = Tensor::from_vec(reversed, (1, 2, 4, 6), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 6), device)?;
        Ok((q, k, v))
    }

    /// Loop-level reference with a boolean keep mask shaped `(q_len, k_len)`.
    fn naive_attention(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        keep: Option<&[Vec<bool>]>,
    ) -> CandleResult<Vec<f32>> {
        let (batch, heads, q_len, dim) = q.dims4()?;
        let k_len = k.dims()[2];
        let q = q.flatten_all()?.to_vec1::<f32>()?;
        let k = k.flatten_all()?.to_vec1::<f32>()?;
        let v = v.flatten_all()?.to_vec1::<f32>()?;
        let scale = 1.0 / (dim as f32).sqrt();
        let mut out = vec![0f32; batch * heads * q_len * dim];

        for bh in 0..batch * heads {
            for qi in 0..q_len {
                let row: Vec<f32> = (0..k_len)
                    .map(|ki| {
                        let allowed = keep.map(|m| m[qi][ki]).unwrap_or(true);
                        if !allowed {
                            return MASK_FILL_VALUE;
                        }
                        let (q_row, k_row) = ((bh * q_len + qi) * dim, (bh * k_len + ki) * dim);
                        (0..dim).map(|d| q[q_row + d] * k[k_row + d]).sum::<f32>() * scale
                    })
                    .collect();
                let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = row.iter().map(|s| (s - max).exp()).collect();
                let denom: f32 = exps.iter().sum();
                for d in 0..dim {
                    out[(bh * q_len + qi) * dim + d] = (0..k_len)
                        .map(|ki| exps[ki] / denom * v[(bh * k_len + ki) * dim + d])
                        .sum();
                }
            }
        }
        Ok(out)
    }

    #[test]
    fn matches_naive_loops_with_causal_mask() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let k_t = k.transpose(2, 3)?.contiguous()?;
        let mask = causal_mask(&device, 4, 4)?;
        let keep: Vec<Vec<bool>> = mask
            .to_vec2::<u8>()?
            .into_iter()
            .map(|row| row.into_iter().map(|x| x != 0).collect())
            .collect();

        let scale = 1.0 / 6f64.sqrt();
        let result =
            scaled_dot_product_attention(&q, &k_t, &v, Some(&mask), scale, &f32_policy())?;
        let expected = naive_attention(&q, &k, &v, Some(&keep))?;
        let actual = result.output.flatten_all()?.to_vec1::<f32>()?;
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5, "{a} vs {e}");
        }
        Ok(())
    }

    #[test]
    fn weights_rows_sum_to_one() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let k_t = k.transpose(2, 3)?.contiguous()?;
        let result = scaled_dot_product_attention(&q, &k_t, &v, None, 0.5, &f32_policy())?;
        assert_eq!(result.weights.dims(), &[1, 2, 4, 4]);
        let sums = result
            .weights
            .sum_keepdim(D::Minus1)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let k_t = Tensor::zeros((1, 2, 8, 5), DType::F32, &device)?;
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let err = scaled_dot_product_attention(&q, &k_t, &v, None, 1.0, &f32_policy()).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let k_t = Tensor::zeros((1, 2, 7, 4), DType::F32, &device)?;
        let err = scaled_dot_product_attention(&q, &k_t, &v, None, 1.0, &f32_policy()).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }

    #[test]
    fn numerical_stability_with_large_scores() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let q = Tensor::full(1_000.0f32, (1, 1, 4, 4), &device)?;
        let k_t = Tensor::full(-1_000.0f32, (1, 1, 4, 4), &device)?;
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let result = scaled_dot_product_attention(&q, &k_t, &v, None, 0.5, &f32_policy())?;
        let out = result.output.flatten_all()?.to_vec1::<f32>()?;
        assert!(out.iter().all(|x| x.is_finite()));
        Ok(())
    }

    #[test]
    fn fully_masked_row_degrades_to_uniform() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let k_t = k.transpose(2, 3)?.contiguous()?;
        // Query 0 may see nothing; the others see everything.
        let mut keep = vec![1u8; 16];
        keep[..4].fill(0);
        let mask = Tensor::from_vec(keep, (4, 4), &device)?;
        let result = scaled_dot_product_attention(&q, &k_t, &v, Some(&mask), 0.5, &f32_policy())?;
        let first_rows = result
            .weights
            .narrow(2, 0, 1)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(first_rows.iter().all(|w| (w - 0.25).abs() < 1e-6));
        Ok(())
    }
}
