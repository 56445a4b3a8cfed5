//! Multi-head cross-attention.
//!
//! Queries come from `x1 (batch, seq_len1, in_dim1)`; keys and values from
//! `x2 (batch, seq_len2, in_dim2)`. Scores are `(batch, heads, seq_len1,
//! seq_len2)`, normalised over `seq_len2`, and the output mirrors `x1`.
//! Typical use is a decoder attending over encoder states.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use layers::{LinearInit, PrecisionPolicy};

use crate::core::{AttentionError, AttentionOutput, AttentionWeights, CrossAttentionConfig};
use crate::projections::{ProjectionDims, Projections};

/// Cross-attention layer owning its query, key, value and output projections.
#[derive(Debug, Clone)]
pub struct CrossAttention {
    config: CrossAttentionConfig,
    projections: Projections,
}

impl CrossAttention {
    /// Builds a layer with PyTorch-style default initialisation.
    pub fn new(
        config: CrossAttentionConfig,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        Self::with_init(config, &LinearInit::TorchDefault, device, dtype)
    }

    pub fn with_init(
        config: CrossAttentionConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let projections =
            Projections::with_init(config.layout(), dims(&config), init, device, dtype)?;
        Ok(Self::finish(config, projections))
    }

    /// Builds a trainable layer whose parameters live in the builder's
    /// `VarMap` under `q_proj`, `k_proj`, `v_proj` and `o_proj`.
    pub fn from_var_builder(
        config: CrossAttentionConfig,
        vb: VarBuilder,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let projections = Projections::from_var_builder(config.layout(), dims(&config), vb)?;
        Ok(Self::finish(config, projections))
    }

    /// Wraps existing projection matrices. `query` is `(heads * k_dim,
    /// in_dim1)`, `key` and `value` take `in_dim2` inputs and `output` maps
    /// back to `in_dim1`.
    pub fn from_weights(
        config: CrossAttentionConfig,
        weights: AttentionWeights,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let projections = Projections::from_weights(config.layout(), dims(&config), weights)?;
        Ok(Self::finish(config, projections))
    }

    fn finish(config: CrossAttentionConfig, projections: Projections) -> Self {
        log::debug!(
            "cross-attention in_dim1={} in_dim2={} k_dim={} v_dim={} heads={} dtype={:?}",
            config.in_dim1,
            config.in_dim2,
            config.k_dim,
            config.v_dim,
            config.num_heads,
            projections.policy().storage()
        );
        Self {
            config,
            projections,
        }
    }

    pub fn config(&self) -> &CrossAttentionConfig {
        &self.config
    }

    pub fn precision(&self) -> &PrecisionPolicy {
        self.projections.policy()
    }

    pub fn weights(&self) -> AttentionWeights {
        self.projections.snapshot()
    }

    /// Replaces every projection matrix. On error the layer is unchanged.
    ///
    /// The new tensors are plain copies; a layer built from a `VarMap` stops
    /// tracking those variables after this call.
    pub fn load_weights(&mut self, weights: &AttentionWeights) -> Result<(), AttentionError> {
        self.projections.load(weights)
    }

    /// Returns `(batch, seq_len1, in_dim1)`.
    ///
    /// `x1` and `x2` must share batch size and device. `mask` must broadcast
    /// to `(batch, num_heads, seq_len1, seq_len2)`.
    pub fn forward(
        &self,
        x1: &Tensor,
        x2: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, AttentionError> {
        Ok(self.forward_with_weights(x1, x2, mask)?.output)
    }

    /// Like [`forward`](Self::forward), also returning the attention
    /// probabilities `(batch, num_heads, seq_len1, seq_len2)`.
    pub fn forward_with_weights(
        &self,
        x1: &Tensor,
        x2: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput, AttentionError> {
        self.projections.attend(("x1", x1), ("x2", x2), mask)
    }
}

fn dims(config: &CrossAttentionConfig) -> ProjectionDims {
    ProjectionDims {
        query_in: config.in_dim1,
        context_in: config.in_dim2,
        out: config.in_dim1,
    }
}
