//! Dense projections used by the attention layers.
//!
//! A [`Linear`] maps inputs shaped `(batch, seq, input_dim)` (or
//! `(rows, input_dim)`) to `(batch, seq, output_dim)`. Weights are stored
//! `(output_dim, input_dim)` and applied as `x · Wᵀ`, with an optional bias of
//! length `output_dim`. Matmuls run in [`PrecisionPolicy::compute`] and the
//! result is cast back to the storage dtype.
//!
//! Parameters come from one of three places: explicit tensors
//! ([`Linear::new`]), a fresh random draw ([`Linear::with_init`]), or a
//! [`VarBuilder`] whose backing `VarMap` lets Candle's autograd track them
//! ([`Linear::from_var_builder`]).

use candle_core::{DType, Device, Error, Result, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::{checks, dtypes::PrecisionPolicy};

/// Static description of a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Outgoing feature dimension.
    pub output_dim: usize,
    /// Whether a bias vector is added after the matmul.
    pub bias: bool,
}

impl LinearConfig {
    /// A projection with a bias term.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// A projection without a bias term.
    pub fn no_bias(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: false,
        }
    }

    fn weight_shape(&self) -> (usize, usize) {
        (self.output_dim, self.input_dim)
    }
}

/// Weight initialisation policies.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearInit {
    /// Kaiming uniform with `a = √5`, i.e. `U(-1/√fan_in, 1/√fan_in)`.
    TorchDefault,
    /// Xavier/Glorot uniform.
    XavierUniform,
    /// Xavier/Glorot normal.
    XavierNormal,
    /// Kaiming/He uniform for a leaky-ReLU slope.
    KaimingUniform { negative_slope: f64 },
    /// Kaiming/He normal for a leaky-ReLU slope.
    KaimingNormal { negative_slope: f64 },
    /// Scales the bound (or standard deviation) of another policy.
    Scaled { base: Box<LinearInit>, scale: f64 },
}

impl LinearInit {
    pub fn scaled(base: LinearInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    /// Resolves the policy to a concrete Candle initialiser for the given fans.
    pub fn to_candle_init(&self, fan_in: usize, fan_out: usize) -> Init {
        match self.draw(fan_in.max(1) as f64, fan_out.max(1) as f64) {
            Draw::Uniform { bound } => Init::Uniform {
                lo: -bound,
                up: bound,
            },
            Draw::Normal { stdev } => Init::Randn { mean: 0.0, stdev },
        }
    }

    fn draw(&self, fan_in: f64, fan_out: f64) -> Draw {
        let kaiming_gain = |slope: f64| (2.0 / (1.0 + slope * slope)).sqrt();
        match self {
            LinearInit::TorchDefault => Draw::Uniform {
                bound: kaiming_gain(5f64.sqrt()) * 3f64.sqrt() / fan_in.sqrt(),
            },
            LinearInit::XavierUniform => Draw::Uniform {
                bound: (6.0 / (fan_in + fan_out)).sqrt(),
            },
            LinearInit::XavierNormal => Draw::Normal {
                stdev: (2.0 / (fan_in + fan_out)).sqrt(),
            },
            LinearInit::KaimingUniform { negative_slope } => Draw::Uniform {
                bound: kaiming_gain(*negative_slope) * 3f64.sqrt() / fan_in.sqrt(),
            },
            LinearInit::KaimingNormal { negative_slope } => Draw::Normal {
                stdev: kaiming_gain(*negative_slope) / fan_in.sqrt(),
            },
            LinearInit::Scaled { base, scale } => match base.draw(fan_in, fan_out) {
                Draw::Uniform { bound } => Draw::Uniform {
                    bound: bound * scale,
                },
                Draw::Normal { stdev } => Draw::Normal {
                    stdev: stdev * scale,
                },
            },
        }
    }
}

/// Zero-centred distribution a policy draws from.
enum Draw {
    Uniform { bound: f64 },
    Normal { stdev: f64 },
}

/// Dense affine projection with an optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Wraps existing parameters after validating their shapes and dtypes.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Draws fresh, untracked parameters. The bias, if any, starts at zero.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init
            .to_candle_init(config.input_dim, config.output_dim)
            .var(config.weight_shape(), dtype, device)?
            .as_detached_tensor();
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Fetches (or creates) `weight` and `bias` under the builder's prefix.
    ///
    /// With a `VarMap`-backed builder the returned tensors are variables, so
    /// gradients computed downstream reach them.
    pub fn from_var_builder(
        config: LinearConfig,
        init: &LinearInit,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            config.weight_shape(),
            "weight",
            init.to_candle_init(config.input_dim, config.output_dim),
        )?;
        let bias = if config.bias {
            Some(vb.get_with_hints(config.output_dim, "bias", Init::Const(0.0))?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Overwrites the weight, keeping the current storage dtype.
    pub fn copy_weight_from(&mut self, value: &Tensor) -> Result<()> {
        Self::validate_weight(&self.config, value)?;
        self.weight = value.to_dtype(self.weight.dtype())?;
        Ok(())
    }

    /// Overwrites the bias, keeping the current storage dtype.
    pub fn copy_bias_from(&mut self, value: &Tensor) -> Result<()> {
        let dtype = match &self.bias {
            Some(existing) => existing.dtype(),
            None => return Err(Error::Msg("linear has no bias to copy into".into())),
        };
        Self::validate_bias(&self.config, Some(value))?;
        self.bias = Some(value.to_dtype(dtype)?);
        Ok(())
    }

    /// Applies `x · Wᵀ (+ b)`.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(&self.weight)?.t()?;
        let mut output = match *input.dims() {
            [batch, seq, _] => input
                .reshape((batch * seq, self.config.input_dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, self.config.output_dim))?,
            _ => input.matmul(&weight_t)?,
        };

        if let Some(bias) = &self.bias {
            output = output.broadcast_add(&policy.cast_for_matmul(bias)?)?;
        }

        policy.cast_to_storage(&output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, checks::FLOAT_DTYPES)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_rank("linear.bias", tensor, 1)?;
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, checks::FLOAT_DTYPES)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        checks::expect_dtype_in("linear.input", hidden, checks::FLOAT_DTYPES)?;
        match *hidden.dims() {
            [batch, seq, _] => {
                checks::expect_batch_seq_hidden("linear.input", hidden, self.config.input_dim)?;
                if batch == 0 || seq == 0 {
                    Err(Error::Msg("batch/seq dimensions must be non-zero".into()))
                } else {
                    Ok(())
                }
            }
            [_, hidden_dim] if hidden_dim == self.config.input_dim => Ok(()),
            [_, hidden_dim] => Err(Error::Msg(format!(
                "expected last dim {} but received {hidden_dim}",
                self.config.input_dim
            ))),
            _ => Err(Error::Msg(
                "linear expects input shaped [B, T, H_in] or [T, H_in]".into(),
            )),
        }
    }
}
