//! Multi-head self-attention.
//!
//! `x` of shape `(batch, seq_len, in_dim)` is projected into queries, keys
//! and values (no bias), split into `num_heads` heads, attended with
//! `softmax(Q·Kᵗ / √k_dim)·V`, merged and projected back to `in_dim`.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use layers::{LinearInit, PrecisionPolicy};

use crate::core::{AttentionError, AttentionOutput, AttentionWeights, SelfAttentionConfig};
use crate::projections::{ProjectionDims, Projections};

/// Self-attention layer owning its query, key, value and output projections.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    config: SelfAttentionConfig,
    projections: Projections,
}

impl MultiHeadAttention {
    /// Builds a layer with PyTorch-style default initialisation.
    pub fn new(
        config: SelfAttentionConfig,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        Self::with_init(config, &LinearInit::TorchDefault, device, dtype)
    }

    pub fn with_init(
        config: SelfAttentionConfig,
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
        config: SelfAttentionConfig,
        vb: VarBuilder,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let projections = Projections::from_var_builder(config.layout(), dims(&config), vb)?;
        Ok(Self::finish(config, projections))
    }

    /// Wraps existing projection matrices.
    pub fn from_weights(
        config: SelfAttentionConfig,
        weights: AttentionWeights,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let projections = Projections::from_weights(config.layout(), dims(&config), weights)?;
        Ok(Self::finish(config, projections))
    }

    fn finish(config: SelfAttentionConfig, projections: Projections) -> Self {
        log::debug!(
            "self-attention in_dim={} k_dim={} v_dim={} heads={} dtype={:?}",
            config.in_dim,
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

    pub fn config(&self) -> &SelfAttentionConfig {
        &self.config
    }

    pub fn precision(&self) -> &PrecisionPolicy {
        self.projections.policy()
    }

    /// Copies of the current projection matrices.
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

    /// Returns `(batch, seq_len, in_dim)`.
    ///
    /// `mask` must broadcast to `(batch, num_heads, seq_len, seq_len)`; pairs
    /// whose entry is zero are excluded before softmax.
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, AttentionError> {
        Ok(self.forward_with_weights(x, mask)?.output)
    }

    /// Like [`forward`](Self::forward), also returning the attention
    /// probabilities `(batch, num_heads, seq_len, seq_len)`.
    pub fn forward_with_weights(
        &self,
        x: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput, AttentionError> {
        self.projections.attend(("x", x), ("x", x), mask)
    }
}

fn dims(config: &SelfAttentionConfig) -> ProjectionDims {
    ProjectionDims {
        query_in: config.in_dim,
        context_in: config.in_dim,
        out: config.in_dim,
    }
}
