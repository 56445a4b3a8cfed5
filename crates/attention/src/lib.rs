//! Multi-head self- and cross-attention layers built on Candle.
//!
//! Both layers own four projection matrices (query, key, value, output) and
//! are pure functions of those parameters and their inputs. Activations use
//! the layout `(batch, seq_len, features)`:
//!
//! * [`MultiHeadAttention::forward`] maps `(batch, seq_len, in_dim)` to the
//!   same shape.
//! * [`CrossAttention::forward`] attends from `x1 (batch, seq_len1, in_dim1)`
//!   over `x2 (batch, seq_len2, in_dim2)` and returns the shape of `x1`.
//!
//! Masks are optional tensors broadcastable to the score tensor
//! `(batch, num_heads, q_len, k_len)`. A zero entry excludes the pair by
//! writing [`masks::MASK_FILL_VALUE`] into the score before softmax.
//!
//! Gradients are Candle's business: build a layer with `from_var_builder` on
//! a `VarMap`-backed builder and call `backward` on any loss downstream of
//! `forward`.

pub mod core;
pub mod cross_attention;
pub mod heads;
pub mod masks;
mod projections;
pub mod reference;
pub mod self_attention;

pub use crate::core::{
    AttentionError, AttentionOutput, AttentionWeights, CrossAttentionConfig, SelfAttentionConfig,
};
pub use cross_attention::CrossAttention;
pub use self_attention::MultiHeadAttention;
