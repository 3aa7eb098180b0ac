//! Normalizing-flow density model for acoustic anomaly detection.
//!
//! Provides a stack of affine coupling layers over a diagonal Gaussian base
//! (exact log-likelihood via the change-of-variables formula), a
//! maximum-likelihood training loop with early stopping, checkpointing, and
//! an anomaly scorer that turns low likelihood into a high score.

pub mod inference;
pub mod model;
pub mod training;
