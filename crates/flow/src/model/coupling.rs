use burn::prelude::*;
use burn::tensor::activation::tanh;

use crate::model::conditioner::{Conditioner, ConditionerConfig};

/// Configuration for one affine coupling layer.
#[derive(Config, Debug)]
pub struct AffineCouplingConfig {
    /// Feature dimension (>= 2).
    pub dim: usize,
    /// Conditioner hidden width.
    #[config(default = 128)]
    pub d_hidden: usize,
    #[config(default = 2)]
    pub num_hidden_layers: usize,
    /// Swap which half conditions and which half is transformed.
    #[config(default = false)]
    pub flip: bool,
    /// Bound on |log-scale|, applied as `max · tanh(s / max)`.
    #[config(default = 3.0)]
    pub max_log_scale: f64,
    #[config(default = true)]
    pub zero_init: bool,
}

/// Affine coupling layer.
///
/// One half of the input passes through unchanged and drives a conditioner
/// that produces a log-scale `s` and shift `t` for the other half:
///
/// ```text
/// forward:  y_b = x_b · exp(s(x_a)) + t(x_a)     log|det| =  Σ s
/// inverse:  x_b = (y_b − t(y_a)) · exp(−s(y_a))   log|det| = −Σ s
/// ```
///
/// The Jacobian is triangular, so the log-determinant is exact and the
/// inverse is closed-form.
#[derive(Module, Debug)]
pub struct AffineCoupling<B: Backend> {
    conditioner: Conditioner<B>,
    dim: usize,
    /// Width of the conditioning half.
    d_cond: usize,
    flip: bool,
    max_log_scale: f64,
}

impl AffineCouplingConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AffineCoupling<B> {
        assert!(self.dim >= 2, "coupling needs dim >= 2, got {}", self.dim);
        assert!(self.max_log_scale > 0.0, "max_log_scale must be positive");
        let d_cond = self.dim / 2;
        let d_trans = self.dim - d_cond;
        AffineCoupling {
            conditioner: ConditionerConfig::new(d_cond, 2 * d_trans)
                .with_d_hidden(self.d_hidden)
                .with_num_hidden_layers(self.num_hidden_layers)
                .with_zero_init(self.zero_init)
                .init(device),
            dim: self.dim,
            d_cond,
            flip: self.flip,
            max_log_scale: self.max_log_scale,
        }
    }
}

impl<B: Backend> AffineCoupling<B> {
    fn d_trans(&self) -> usize {
        self.dim - self.d_cond
    }

    /// Split into `(conditioning, transformed)` halves.
    fn split(&self, x: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, _] = x.dims();
        if self.flip {
            let cut = self.d_trans();
            let trans = x.clone().slice([0..batch, 0..cut]);
            let cond = x.slice([0..batch, cut..self.dim]);
            (cond, trans)
        } else {
            let cond = x.clone().slice([0..batch, 0..self.d_cond]);
            let trans = x.slice([0..batch, self.d_cond..self.dim]);
            (cond, trans)
        }
    }

    fn merge(&self, cond: Tensor<B, 2>, trans: Tensor<B, 2>) -> Tensor<B, 2> {
        if self.flip {
            Tensor::cat(vec![trans, cond], 1)
        } else {
            Tensor::cat(vec![cond, trans], 1)
        }
    }

    /// Bounded log-scale and shift for the transformed half.
    fn scale_shift(&self, cond: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, _] = cond.dims();
        let d_trans = self.d_trans();
        let params = self.conditioner.forward(cond);
        let raw_s = params.clone().slice([0..batch, 0..d_trans]);
        let t = params.slice([0..batch, d_trans..2 * d_trans]);
        let s = tanh(raw_s.div_scalar(self.max_log_scale)).mul_scalar(self.max_log_scale);
        (s, t)
    }

    /// Data → latent direction. Returns `(y, log_det)` with shapes
    /// `(batch, dim)` and `(batch,)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let (cond, trans) = self.split(x);
        let (s, t) = self.scale_shift(cond.clone());
        let y_trans = trans * s.clone().exp() + t;
        let log_det = s.sum_dim(1).squeeze::<1>(1);
        (self.merge(cond, y_trans), log_det)
    }

    /// Latent → data direction. Exact inverse of [`forward`](Self::forward);
    /// the returned log-determinant is the negation of the forward one.
    pub fn inverse(&self, y: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let (cond, trans) = self.split(y);
        let (s, t) = self.scale_shift(cond.clone());
        let x_trans = (trans - t) * s.clone().neg().exp();
        let log_det = s.sum_dim(1).squeeze::<1>(1).neg();
        (self.merge(cond, x_trans), log_det)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn max_abs_diff(a: Tensor<TestBackend, 2>, b: Tensor<TestBackend, 2>) -> f32 {
        (a - b).abs().max().into_scalar().elem()
    }

    #[test]
    fn test_zero_init_is_identity() {
        let device = Default::default();
        let layer = AffineCouplingConfig::new(5)
            .with_d_hidden(8)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::random([4, 5], Distribution::Normal(0.0, 1.0), &device);

        let (y, log_det) = layer.forward(x.clone());
        assert!(max_abs_diff(x, y) < 1e-6);
        let ld: f32 = log_det.abs().sum().into_scalar().elem();
        assert!(ld < 1e-6);
    }

    #[test]
    fn test_inverse_recovers_input() {
        let device = Default::default();
        for flip in [false, true] {
            let layer = AffineCouplingConfig::new(5)
                .with_d_hidden(8)
                .with_flip(flip)
                .with_zero_init(false)
                .init::<TestBackend>(&device);
            let x =
                Tensor::<TestBackend, 2>::random([6, 5], Distribution::Normal(0.0, 1.0), &device);

            let (y, ld_fwd) = layer.forward(x.clone());
            let (x_back, ld_inv) = layer.inverse(y.clone());

            assert!(max_abs_diff(x.clone(), x_back) < 1e-4, "flip={flip}");
            assert!(max_abs_diff(x, y) > 1e-4, "random init should change the input");
            let total: f32 = (ld_fwd + ld_inv).abs().max().into_scalar().elem();
            assert!(total < 1e-4, "log-dets should cancel, flip={flip}");
        }
    }

    #[test]
    fn test_conditioning_half_passes_through() {
        let device = Default::default();
        let layer = AffineCouplingConfig::new(4)
            .with_d_hidden(8)
            .with_zero_init(false)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::random([3, 4], Distribution::Normal(0.0, 1.0), &device);
        let (y, _) = layer.forward(x.clone());

        let head_x = x.slice([0..3, 0..2]);
        let head_y = y.slice([0..3, 0..2]);
        assert!(max_abs_diff(head_x, head_y) < 1e-7);
    }

    #[test]
    fn test_log_scale_is_bounded() {
        let device = Default::default();
        let layer = AffineCouplingConfig::new(2)
            .with_d_hidden(4)
            .with_max_log_scale(0.5)
            .with_zero_init(false)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::random([16, 2], Distribution::Normal(0.0, 50.0), &device);
        let (_, log_det) = layer.forward(x);
        let worst: f32 = log_det.abs().max().into_scalar().elem();
        assert!(worst <= 0.5 + 1e-5, "|log_det| = {worst} exceeds bound");
    }
}
