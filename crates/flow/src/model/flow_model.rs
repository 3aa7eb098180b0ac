use burn::prelude::*;

use crate::model::base::{DiagGaussian, DiagGaussianConfig};
use crate::model::coupling::{AffineCoupling, AffineCouplingConfig};

/// Configuration for the full normalizing flow.
///
/// ```text
/// x: (batch, dim)
///   → AffineCoupling(flip=false) → AffineCoupling(flip=true) → … × num_layers
///   → z: (batch, dim)
/// log p(x) = log N(z; loc, diag(exp(log_scale))²) + Σ log|det J_k|
/// ```
#[derive(Config, Debug)]
pub struct FlowModelConfig {
    /// Feature dimension (>= 2).
    pub dim: usize,
    /// Number of coupling layers; odd-indexed layers flip the split.
    #[config(default = 32)]
    pub num_layers: usize,
    /// Conditioner hidden width.
    #[config(default = 128)]
    pub hidden_dim: usize,
    /// Hidden-to-hidden layers per conditioner.
    #[config(default = 2)]
    pub num_hidden_layers: usize,
    #[config(default = 3.0)]
    pub max_log_scale: f64,
    /// Start every coupling at the identity map.
    #[config(default = true)]
    pub zero_init: bool,
}

/// Invertible flow: coupling stack over a diagonal Gaussian base.
#[derive(Module, Debug)]
pub struct FlowModel<B: Backend> {
    layers: Vec<AffineCoupling<B>>,
    base: DiagGaussian<B>,
}

impl FlowModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FlowModel<B> {
        assert!(self.dim >= 2, "flow needs dim >= 2, got {}", self.dim);
        assert!(self.num_layers > 0, "flow needs at least one coupling layer");
        let layers = (0..self.num_layers)
            .map(|i| {
                AffineCouplingConfig::new(self.dim)
                    .with_d_hidden(self.hidden_dim)
                    .with_num_hidden_layers(self.num_hidden_layers)
                    .with_flip(i % 2 == 1)
                    .with_max_log_scale(self.max_log_scale)
                    .with_zero_init(self.zero_init)
                    .init(device)
            })
            .collect();
        FlowModel {
            layers,
            base: DiagGaussianConfig::new(self.dim).init(device),
        }
    }
}

impl<B: Backend> FlowModel<B> {
    pub fn dim(&self) -> usize {
        self.base.dim()
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Data → latent. Returns `(z, log_det)` where `log_det` sums every
    /// layer's contribution, shape `(batch,)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let [batch, _] = x.dims();
        let mut log_det = Tensor::<B, 1>::zeros([batch], &x.device());
        let mut z = x;
        for layer in &self.layers {
            let (next, ld) = layer.forward(z);
            z = next;
            log_det = log_det + ld;
        }
        (z, log_det)
    }

    /// Latent → data, applying the layers in reverse order.
    pub fn inverse(&self, z: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let [batch, _] = z.dims();
        let mut log_det = Tensor::<B, 1>::zeros([batch], &z.device());
        let mut x = z;
        for layer in self.layers.iter().rev() {
            let (next, ld) = layer.inverse(x);
            x = next;
            log_det = log_det + ld;
        }
        (x, log_det)
    }

    /// Exact log-likelihood of each row, shape `(batch,)`.
    pub fn log_prob(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        let (z, log_det) = self.forward(x);
        self.base.log_prob(z) + log_det
    }

    /// Draw `n` samples in data space.
    pub fn sample(&self, n: usize, device: &B::Device) -> Tensor<B, 2> {
        let z = self.base.sample(n, device);
        self.inverse(z).0
    }
}
