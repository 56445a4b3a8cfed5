//! Error types emitted by the attention layers.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// A configuration value is out of range.
    #[error("invalid attention config: {context}")]
    InvalidConfig { context: String },
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape: {context}")]
    InvalidShape { context: String },
    /// The layer does not support the requested data type.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType { requested: String },
    /// A backend failure propagated from Candle.
    #[error("candle error: {0}")]
    Backend(#[from] candle_core::Error),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }

    pub(crate) fn config(context: impl Into<String>) -> Self {
        Self::InvalidConfig {
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = AttentionError::shape("x last dim 3 != in_dim 4");
        assert_eq!(
            err.to_string(),
            "invalid tensor shape: x last dim 3 != in_dim 4"
        );

        let err = AttentionError::config("num_heads must be greater than zero");
        assert_eq!(
            err.to_string(),
            "invalid attention config: num_heads must be greater than zero"
        );
    }

    #[test]
    fn candle_errors_convert() {
        let err: AttentionError = candle_core::Error::Msg("boom".into()).into();
        assert!(matches!(err, AttentionError::Backend(_)));
    }
}
