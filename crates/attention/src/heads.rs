//! Splitting packed projections into heads and merging them back.

use candle_core::{Result, Tensor};

/// `(batch, seq, heads * head_dim)` → `(batch, heads, seq, head_dim)`.
pub fn split_heads(tensor: &Tensor, num_heads: usize, head_dim: usize) -> Result<Tensor> {
    let (batch, seq, _) = tensor.dims3()?;
    tensor
        .reshape((batch, seq, num_heads, head_dim))?
        .permute((0, 2, 1, 3))?
        .contiguous()
}

/// `(batch, seq, heads * head_dim)` → `(batch, heads, head_dim, seq)`.
///
/// Keys are laid out this way so `q.matmul(&k_t)` yields the dot products.
pub fn split_heads_transposed(
    tensor: &Tensor,
    num_heads: usize,
    head_dim: usize,
) -> Result<Tensor> {
    let (batch, seq, _) = tensor.dims3()?;
    tensor
        .reshape((batch, seq, num_heads, head_dim))?
        .permute((0, 2, 3, 1))?
        .contiguous()
}

/// `(batch, heads, seq, head_dim)` → `(batch, seq, heads * head_dim)`.
pub fn merge_heads(tensor: &Tensor) -> Result<Tensor> {
    let (batch, heads, seq, head_dim) = tensor.dims4()?;
    tensor
        .permute((0, 2, 1, 3))?
        .contiguous()?
        .reshape((batch, seq, heads * head_dim))
}
