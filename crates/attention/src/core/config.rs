//! Construction-time dimensions for both attention layers.
//!
//! The dimensions are fixed for the lifetime of a layer. Configs deserialize
//! from JSON (unknown keys rejected) and are validated before any parameter is
//! allocated.

use serde::{Deserialize, Serialize};

use super::AttentionError;

/// Head geometry shared by self- and cross-attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadLayout {
    pub num_heads: usize,
    pub k_dim: usize,
    pub v_dim: usize,
}

impl HeadLayout {
    /// Width of the packed query/key projections.
    pub fn qk_width(&self) -> usize {
        self.num_heads * self.k_dim
    }

    /// Width of the packed value projection.
    pub fn v_width(&self) -> usize {
        self.num_heads * self.v_dim
    }

    /// Rejects head counts whose packed widths do not fit in `usize`.
    fn check_widths(&self) -> Result<(), AttentionError> {
        for (name, dim) in [("k_dim", self.k_dim), ("v_dim", self.v_dim)] {
            if self.num_heads.checked_mul(dim).is_none() {
                return Err(AttentionError::config(format!(
                    "num_heads * {name} overflows ({} * {dim})",
                    self.num_heads
                )));
            }
        }
        Ok(())
    }

    /// `1 / sqrt(k_dim)`, the dot-product scale.
    pub fn scale(&self) -> f64 {
        1.0 / (self.k_dim as f64).sqrt()
    }
}

/// Dimensions of a multi-head self-attention layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelfAttentionConfig {
    pub in_dim: usize,
    pub k_dim: usize,
    pub v_dim: usize,
    pub num_heads: usize,
}

impl SelfAttentionConfig {
    pub fn new(in_dim: usize, k_dim: usize, v_dim: usize, num_heads: usize) -> Self {
        Self {
            in_dim,
            k_dim,
            v_dim,
            num_heads,
        }
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        require_positive("in_dim", self.in_dim)?;
        require_positive("k_dim", self.k_dim)?;
        require_positive("v_dim", self.v_dim)?;
        require_positive("num_heads", self.num_heads)?;
        self.layout().check_widths()
    }

    pub fn layout(&self) -> HeadLayout {
        HeadLayout {
            num_heads: self.num_heads,
            k_dim: self.k_dim,
            v_dim: self.v_dim,
        }
    }
}

/// Dimensions of a multi-head cross-attention layer.
///
/// Queries come from a sequence of width `in_dim1`; keys and values from a
/// sequence of width `in_dim2`. The output has width `in_dim1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossAttentionConfig {
    pub in_dim1: usize,
    pub in_dim2: usize,
    pub k_dim: usize,
    pub v_dim: usize,
    pub num_heads: usize,
}

impl CrossAttentionConfig {
    pub fn new(
        in_dim1: usize,
        in_dim2: usize,
        k_dim: usize,
        v_dim: usize,
        num_heads: usize,
    ) -> Self {
        Self {
            in_dim1,
            in_dim2,
            k_dim,
            v_dim,
            num_heads,
        }
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        require_positive("in_dim1", self.in_dim1)?;
        require_positive("in_dim2", self.in_dim2)?;
        require_positive("k_dim", self.k_dim)?;
        require_positive("v_dim", self.v_dim)?;
        require_positive("num_heads", self.num_heads)?;
        self.layout().check_widths()
    }

    pub fn layout(&self) -> HeadLayout {
        HeadLayout {
            num_heads: self.num_heads,
            k_dim: self.k_dim,
            v_dim: self.v_dim,
        }
    }
}

fn require_positive(name: &str, value: usize) -> Result<(), AttentionError> {
    if value == 0 {
        Err(AttentionError::config(format!("{name} must be greater than zero")))
    } else {
        Ok(())
    }
}
