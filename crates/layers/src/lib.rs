//! Building blocks shared by the attention layers.
//!
//! Everything here is expressed with Candle primitives and follows the
//! `(batch, seq, hidden)` activation layout.

pub mod checks;
pub mod dtypes;
pub mod linear;

pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
