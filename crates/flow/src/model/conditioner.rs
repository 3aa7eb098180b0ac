use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Configuration for the coupling conditioner MLP.
///
/// Maps the untouched half of a coupling input to the raw log-scale and
/// translation of the transformed half.
///
/// ```text
/// (batch, d_input)
///   → Linear(d_input→d_hidden) → ReLU
///   → [Linear(d_hidden→d_hidden) → ReLU] × num_hidden_layers
///   → Linear(d_hidden→d_output)
///   → (batch, d_output)
/// ```
#[derive(Config, Debug)]
pub struct ConditionerConfig {
    /// Width of the conditioning half.
    pub d_input: usize,
    /// Output width, `2 ×` the transformed half (scale and shift).
    pub d_output: usize,
    /// Hidden layer width.
    #[config(default = 128)]
    pub d_hidden: usize,
    /// Number of hidden-to-hidden layers after the input layer.
    #[config(default = 2)]
    pub num_hidden_layers: usize,
    /// Zero the output layer so a fresh coupling is the identity map.
    #[config(default = true)]
    pub zero_init: bool,
}

/// Conditioner MLP of one affine coupling layer.
#[derive(Module, Debug)]
pub struct Conditioner<B: Backend> {
    input: Linear<B>,
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
}

impl ConditionerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Conditioner<B> {
        let hidden = (0..self.num_hidden_layers)
            .map(|_| LinearConfig::new(self.d_hidden, self.d_hidden).init(device))
            .collect();

        let mut output = LinearConfig::new(self.d_hidden, self.d_output);
        if self.zero_init {
            output = output.with_initializer(Initializer::Zeros);
        }

        Conditioner {
            input: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            hidden,
            output: output.init(device),
        }
    }
}

impl<B: Backend> Conditioner<B> {
    /// Input shape: `(batch, d_input)`, output shape: `(batch, d_output)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut h = relu(self.input.forward(x));
        for layer in &self.hidden {
            h = relu(layer.forward(h));
        }
        self.output.forward(h)
    }
}
