//! Maximum-likelihood objective for flow training.

use std::f64::consts::LN_2;

use burn::prelude::*;

/// Mean negative log-likelihood over a batch.
///
/// # Arguments
/// - `log_prob`: shape `(batch,)`, the exact log-density of each sample
///
/// # Returns
/// Scalar loss tensor of shape `(1,)`.
pub fn nll_loss<B: Backend>(log_prob: Tensor<B, 1>) -> Tensor<B, 1> {
    log_prob.mean().neg()
}

/// Convert a mean NLL in nats to bits per dimension.
pub fn bits_per_dim(nll: f64, dim: usize) -> f64 {
    nll / (dim.max(1) as f64 * LN_2)
}
