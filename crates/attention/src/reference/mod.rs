//! Portable, exact scaled dot-product attention.
//!
//! This path favours clarity and differentiability over raw speed; both
//! attention layers route through it.

pub mod exact;

pub use exact::scaled_dot_product_attention;
