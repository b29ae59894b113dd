use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Gelu, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Position-wise feed-forward block.
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    gelu: Gelu,
    dropout: Dropout,
}

impl<B: Backend> FeedForward<B> {
    pub fn new(hidden_size: usize, ffn_size: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(hidden_size, ffn_size).init(device),
            fc2: LinearConfig::new(ffn_size, hidden_size).init(device),
            gelu: Gelu::new(),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.fc1.forward(x);
        let x = self.gelu.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}
