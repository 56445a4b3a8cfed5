//! The four projections and the forward pass shared by both layers.
//!
//! Self-attention is the special case where the query source and the
//! key/value source are the same tensor.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use layers::{checks, Linear, LinearConfig, LinearInit, PrecisionPolicy};

use crate::core::{AttentionError, AttentionOutput, AttentionWeights, HeadLayout};
use crate::heads::{merge_heads, split_heads, split_heads_transposed};
use crate::reference::scaled_dot_product_attention;

/// Feature widths around the projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProjectionDims {
    pub query_in: usize,
    pub context_in: usize,
    pub out: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Projections {
    layout: HeadLayout,
    dims: ProjectionDims,
    policy: PrecisionPolicy,
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
}

fn linear_configs(layout: &HeadLayout, dims: &ProjectionDims) -> [LinearConfig; 4] {
    [
        LinearConfig::no_bias(dims.query_in, layout.qk_width()),
        LinearConfig::no_bias(dims.context_in, layout.qk_width()),
        LinearConfig::no_bias(dims.context_in, layout.v_width()),
        LinearConfig::new(layout.v_width(), dims.out),
    ]
}

impl Projections {
    pub(crate) fn with_init(
        layout: HeadLayout,
        dims: ProjectionDims,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        let [q, k, v, o] = linear_configs(&layout, &dims);
        Self::assemble(
            layout,
            dims,
            dtype,
            Linear::with_init(q, init, device, dtype)?,
            Linear::with_init(k, init, device, dtype)?,
            Linear::with_init(v, init, device, dtype)?,
            Linear::with_init(o, init, device, dtype)?,
        )
    }

    pub(crate) fn from_var_builder(
        layout: HeadLayout,
        dims: ProjectionDims,
        vb: VarBuilder,
    ) -> Result<Self, AttentionError> {
        let [q, k, v, o] = linear_configs(&layout, &dims);
        let init = LinearInit::TorchDefault;
        Self::assemble(
            layout,
            dims,
            vb.dtype(),
            Linear::from_var_builder(q, &init, vb.pp("q_proj"))?,
            Linear::from_var_builder(k, &init, vb.pp("k_proj"))?,
            Linear::from_var_builder(v, &init, vb.pp("v_proj"))?,
            Linear::from_var_builder(o, &init, vb.pp("o_proj"))?,
        )
    }

    pub(crate) fn from_weights(
        layout: HeadLayout,
        dims: ProjectionDims,
        weights: AttentionWeights,
    ) -> Result<Self, AttentionError> {
        let dtype = weights.query.dtype();
        let [q, k, v, o] = linear_configs(&layout, &dims);
        let output_bias = output_bias_or_zeros(&weights, dims.out)?;
        Self::assemble(
            layout,
            dims,
            dtype,
            weight_linear("query", q, weights.query)?,
            weight_linear("key", k, weights.key)?,
            weight_linear("value", v, weights.value)?,
            Linear::new(o, weights.output, Some(output_bias))
                .map_err(|e| AttentionError::shape(format!("output projection: {e}")))?,
        )
    }

    fn assemble(
        layout: HeadLayout,
        dims: ProjectionDims,
        dtype: DType,
        query: Linear,
        key: Linear,
        value: Linear,
        output: Linear,
    ) -> Result<Self, AttentionError> {
        for linear in [&query, &key, &value, &output] {
            if linear.weight().dtype() != dtype {
                return Err(AttentionError::UnsupportedDType {
                    requested: format!(
                        "projection weights must share dtype {dtype:?}, found {:?}",
                        linear.weight().dtype()
                    ),
                });
            }
        }
        Ok(Self {
            layout,
            dims,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            query,
            key,
            value,
            output,
        })
    }

    pub(crate) fn policy(&self) -> &PrecisionPolicy {
        &self.policy
    }

    pub(crate) fn snapshot(&self) -> AttentionWeights {
        AttentionWeights {
            query: self.query.weight().clone(),
            key: self.key.weight().clone(),
            value: self.value.weight().clone(),
            output: self.output.weight().clone(),
            output_bias: self.output.bias().cloned(),
        }
    }

    /// Overwrites all parameters; nothing is changed if any shape is wrong.
    pub(crate) fn load(&mut self, weights: &AttentionWeights) -> Result<(), AttentionError> {
        let mut staged = self.clone();
        let bias = output_bias_or_zeros(weights, self.dims.out)?;
        staged
            .query
            .copy_weight_from(&weights.query)
            .and_then(|_| staged.key.copy_weight_from(&weights.key))
            .and_then(|_| staged.value.copy_weight_from(&weights.value))
            .and_then(|_| staged.output.copy_weight_from(&weights.output))
            .and_then(|_| staged.output.copy_bias_from(&bias))
            .map_err(|e| AttentionError::shape(format!("load weights: {e}")))?;
        *self = staged;
        Ok(())
    }

    /// Attends from `queries` over `context`.
    pub(crate) fn attend(
        &self,
        queries: (&str, &Tensor),
        context: (&str, &Tensor),
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput, AttentionError> {
        let (q_name, queries) = queries;
        let (c_name, context) = context;
        let (batch, q_len) = validate_sequence(q_name, queries, self.dims.query_in)?;
        let (c_batch, k_len) = validate_sequence(c_name, context, self.dims.context_in)?;
        if c_batch != batch {
            return Err(AttentionError::shape(format!(
                "{q_name} batch {batch} does not match {c_name} batch {c_batch}"
            )));
        }
        if !queries.device().same_device(context.device()) {
            return Err(AttentionError::shape(format!(
                "{q_name} and {c_name} must reside on the same device"
            )));
        }
        log::trace!(
            "attend batch={batch} q_len={q_len} k_len={k_len} heads={}",
            self.layout.num_heads
        );

        let HeadLayout {
            num_heads,
            k_dim,
            v_dim,
        } = self.layout;
        let q = self.query.forward(queries, &self.policy)?;
        let k = self.key.forward(context, &self.policy)?;
        let v = self.value.forward(context, &self.policy)?;
        let q = split_heads(&q, num_heads, k_dim)?;
        let k_t = split_heads_transposed(&k, num_heads, k_dim)?;
        let v = split_heads(&v, num_heads, v_dim)?;

        let attended =
            scaled_dot_product_attention(&q, &k_t, &v, mask, self.layout.scale(), &self.policy)?;
        let merged = merge_heads(&attended.output)?;
        Ok(AttentionOutput {
            output: self.output.forward(&merged, &self.policy)?,
            weights: attended.weights,
        })
    }
}

fn weight_linear(
    name: &str,
    config: LinearConfig,
    weight: Tensor,
) -> Result<Linear, AttentionError> {
    Linear::new(config, weight, None)
        .map_err(|e| AttentionError::shape(format!("{name} projection: {e}")))
}

fn output_bias_or_zeros(weights: &AttentionWeights, out: usize) -> Result<Tensor, AttentionError> {
    match &weights.output_bias {
        Some(bias) => Ok(bias.clone()),
        None => Ok(Tensor::zeros(out, weights.output.dtype(), weights.output.device())?),
    }
}

/// Checks a `(batch, seq_len, in_dim)` activation and returns `(batch, seq_len)`.
fn validate_sequence(
    name: &str,
    x: &Tensor,
    in_dim: usize,
) -> Result<(usize, usize), AttentionError> {
    if checks::expect_dtype_in(name, x, checks::FLOAT_DTYPES).is_err() {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("{name} has dtype {:?}", x.dtype()),
        });
    }
    match *x.dims() {
        [batch, seq, features] if features == in_dim => {
            if batch == 0 || seq == 0 {
                Err(AttentionError::shape(format!(
                    "{name} batch and seq_len must be non-zero, got {:?}",
                    x.dims()
                )))
            } else {
                Ok((batch, seq))
            }
        }
        [_, _, features] => Err(AttentionError::shape(format!(
            "{name} last dim {features} does not match configured in_dim {in_dim}"
        ))),
        _ => Err(AttentionError::shape(format!(
            "{name} must have shape [batch, seq_len, {in_dim}], got {:?}",
            x.dims()
        ))),
    }
}
