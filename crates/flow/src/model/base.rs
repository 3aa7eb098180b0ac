use std::f64::consts::PI;

use burn::module::Param;
use burn::prelude::*;
use burn::tensor::Distribution;

/// Configuration for the diagonal Gaussian base distribution.
#[derive(Config, Debug)]
pub struct DiagGaussianConfig {
    pub dim: usize,
}

/// Diagonal Gaussian with trainable mean and log standard deviation.
///
/// Both parameters start at zero, so a fresh base is the standard normal.
#[derive(Module, Debug)]
pub struct DiagGaussian<B: Backend> {
    loc: Param<Tensor<B, 1>>,
    log_scale: Param<Tensor<B, 1>>,
}

impl DiagGaussianConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DiagGaussian<B> {
        DiagGaussian {
            loc: Param::from_tensor(Tensor::zeros([self.dim], device)),
            log_scale: Param::from_tensor(Tensor::zeros([self.dim], device)),
        }
    }
}

impl<B: Backend> DiagGaussian<B> {
    pub fn dim(&self) -> usize {
        self.loc.dims()[0]
    }

    /// Log-density of each row of `z`.
    ///
    /// Input shape: `(batch, dim)`, output shape: `(batch,)`.
    pub fn log_prob(&self, z: Tensor<B, 2>) -> Tensor<B, 1> {
        let d = self.dim();
        let loc = self.loc.val().unsqueeze_dim::<2>(0);
        let log_scale = self.log_scale.val();
        let scale = log_scale.clone().exp().unsqueeze_dim::<2>(0);

        let standardized = (z - loc) / scale;
        let quad = standardized.powf_scalar(2.0).sum_dim(1).squeeze::<1>(1);
        let norm = -0.5 * d as f64 * (2.0 * PI).ln();
        let log_det: Tensor<B, 1> = log_scale.sum();

        quad.mul_scalar(-0.5).add_scalar(norm) - log_det
    }

    /// Draw `n` latent samples, shape `(n, dim)`.
    pub fn sample(&self, n: usize, device: &B::Device) -> Tensor<B, 2> {
        let eps = Tensor::<B, 2>::random([n, self.dim()], Distribution::Normal(0.0, 1.0), device);
        let loc = self.loc.val().unsqueeze_dim::<2>(0);
        let scale = self.log_scale.val().exp().unsqueeze_dim::<2>(0);
        eps * scale + loc
    }
}
