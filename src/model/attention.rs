use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};

/// Multi-head attention, usable for both self-attention (query == key/value
/// source) and decoder cross-attention.
#[derive(Module, Debug)]
pub struct MultiHeadAttention<B: Backend> {
    heads: usize,
    hidden_size: usize,
    head_size: usize,
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    proj: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> MultiHeadAttention<B> {
    pub fn new(hidden_size: usize, heads: usize, dropout: f64, device: &B::Device) -> Self {
        let head_size = hidden_size / heads;
        assert!(
            head_size * heads == hidden_size,
            "hidden_size must be divisible by heads"
        );

        Self {
            heads,
            hidden_size,
            head_size,
            query: LinearConfig::new(hidden_size, hidden_size).init(device),
            key: LinearConfig::new(hidden_size, hidden_size).init(device),
            value: LinearConfig::new(hidden_size, hidden_size).init(device),
            proj: LinearConfig::new(hidden_size, hidden_size).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    /// `mask_attn` masks query/key positions, e.g. the autoregressive
    /// triangle; `mask_pad` masks padded key positions.
    pub fn forward(
        &self,
        query: Tensor<B, 3>,
        key_value: Tensor<B, 3>,
        mask_attn: Option<Tensor<B, 3, Bool>>,
        mask_pad: Option<Tensor<B, 2, Bool>>,
    ) -> Tensor<B, 3> {
        let [batch_size, query_length, _] = query.dims();
        let [_, key_length, _] = key_value.dims();

        let q = self
            .query
            .forward(query)
            .reshape([batch_size, query_length, self.heads, self.head_size])
            .swap_dims(1, 2); // [B, H, Tq, D/H]

        let k = self
            .key
            .forward(key_value.clone())
            .reshape([batch_size, key_length, self.heads, self.head_size])
            .swap_dims(1, 2); // [B, H, Tk, D/H]

        let v = self
            .value
            .forward(key_value)
            .reshape([batch_size, key_length, self.heads, self.head_size])
            .swap_dims(1, 2); // [B, H, Tk, D/H]

        let mut scores = q.matmul(k.swap_dims(2, 3)) / (self.head_size as f64).sqrt();

        if let Some(mask) = mask_pad {
            let mask = mask
                .unsqueeze_dim::<3>(1)
                .unsqueeze_dim::<4>(1)
                .repeat_dim(1, self.heads)
                .repeat_dim(2, query_length); // [B, H, Tq, Tk]
            scores = scores.mask_fill(mask, f64::NEG_INFINITY);
        }

        if let Some(mask) = mask_attn {
            let mask = mask.unsqueeze_dim::<4>(1).repeat_dim(1, self.heads);
            scores = scores.mask_fill(mask, f64::NEG_INFINITY);
        }

        let attention = self.dropout.forward(softmax(scores, 3));

        let out = attention
            .matmul(v) // [B, H, Tq, D/H]
            .swap_dims(1, 2) // [B, Tq, H, D/H]
            .reshape([batch_size, query_length, self.hidden_size]);

        self.proj.forward(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::nn::attention::generate_autoregressive_mask;

    type TestBackend = NdArray<f32>;

    #[test]
    fn preserves_query_shape() {
        let device = Default::default();
        let attention = MultiHeadAttention::<TestBackend>::new(16, 4, 0.0, &device);

        let query = Tensor::zeros([2, 5, 16], &device);
        let key_value = Tensor::zeros([2, 7, 16], &device);
        let out = attention.forward(query, key_value, None, None);
        assert_eq!(out.dims(), [2, 5, 16]);
    }

    #[test]
    fn masked_self_attention_stays_finite() {
        let device = Default::default();
        let attention = MultiHeadAttention::<TestBackend>::new(16, 4, 0.0, &device);

        let x = Tensor::random([2, 6, 16], burn::tensor::Distribution::Default, &device);
        let mask = generate_autoregressive_mask::<TestBackend>(2, 6, &device);
        let out = attention.forward(x.clone(), x, Some(mask), None);

        let values: Vec<f32> = out.to_data().to_vec().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }
}
