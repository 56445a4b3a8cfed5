//! Boolean attention masks and the masked-fill step.
//!
//! A mask is any numeric tensor broadcastable to the score tensor
//! `(batch, num_heads, q_len, k_len)`. Entries equal to zero mark disallowed
//! query/key pairs; every other value allows the pair. The builders here emit
//! [`MASK_DTYPE`] tensors holding `1` (keep) or `0` (exclude).
//!
//! Disallowed scores are overwritten with [`MASK_FILL_VALUE`] before softmax.
//! If every key of a query row is excluded, the row is uniformly
//! `MASK_FILL_VALUE` and softmax spreads its mass evenly over those keys. That
//! degenerate case is left as is.

pub mod causal;
pub mod fill;
pub mod padding;

use candle_core::DType;

/// Dtype produced by the mask builders.
pub const MASK_DTYPE: DType = DType::U8;

/// Score written into excluded positions ahead of softmax.
pub const MASK_FILL_VALUE: f32 = -1e9;

pub use causal::causal_mask;
pub use fill::{apply_mask, ensure_broadcastable};
pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};
