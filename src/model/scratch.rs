use super::attention::MultiHeadAttention;
use super::mlp::FeedForward;
use super::TranslationModel;
use crate::data::TranslationBatch;
use burn::{
    nn::{
        attention::generate_autoregressive_mask, loss::CrossEntropyLossConfig, Dropout,
        DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear,
        LinearConfig, PositionalEncoding, PositionalEncodingConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

#[derive(Module, Debug)]
struct EncoderBlock<B: Backend> {
    self_attention: MultiHeadAttention<B>,
    feed_forward: FeedForward<B>,
    norm_attention: LayerNorm<B>,
    norm_forward: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    fn new(
        hidden_size: usize,
        ffn_size: usize,
        heads: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            self_attention: MultiHeadAttention::new(hidden_size, heads, dropout, device),
            feed_forward: FeedForward::new(hidden_size, ffn_size, dropout, device),
            norm_attention: LayerNormConfig::new(hidden_size).init(device),
            norm_forward: LayerNormConfig::new(hidden_size).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    // Post-norm residual blocks
    fn forward(&self, input: Tensor<B, 3>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attended =
            self.self_attention
                .forward(input.clone(), input.clone(), None, Some(mask_pad));
        let x = self
            .norm_attention
            .forward(input + self.dropout.forward(attended));
        let fed = self.feed_forward.forward(x.clone());
        self.norm_forward.forward(x + self.dropout.forward(fed))
    }
}

#[derive(Module, Debug)]
struct DecoderBlock<B: Backend> {
    self_attention: MultiHeadAttention<B>,
    cross_attention: MultiHeadAttention<B>,
    feed_forward: FeedForward<B>,
    norm_self: LayerNorm<B>,
    norm_cross: LayerNorm<B>,
    norm_forward: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> DecoderBlock<B> {
    fn new(
        hidden_size: usize,
        ffn_size: usize,
        heads: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            self_attention: MultiHeadAttention::new(hidden_size, heads, dropout, device),
            cross_attention: MultiHeadAttention::new(hidden_size, heads, dropout, device),
            feed_forward: FeedForward::new(hidden_size, ffn_size, dropout, device),
            norm_self: LayerNormConfig::new(hidden_size).init(device),
            norm_cross: LayerNormConfig::new(hidden_size).init(device),
            norm_forward: LayerNormConfig::new(hidden_size).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    fn forward(
        &self,
        target: Tensor<B, 3>,
        memory: Tensor<B, 3>,
        mask_attn: Tensor<B, 3, Bool>,
        target_mask_pad: Tensor<B, 2, Bool>,
        memory_mask_pad: Tensor<B, 2, Bool>,
    ) -> Tensor<B, 3> {
        let attended = self.self_attention.forward(
            target.clone(),
            target.clone(),
            Some(mask_attn),
            Some(target_mask_pad),
        );
        let x = self.norm_self.forward(target + self.dropout.forward(attended));

        let crossed = self
            .cross_attention
            .forward(x.clone(), memory, None, Some(memory_mask_pad));
        let x = self.norm_cross.forward(x + self.dropout.forward(crossed));

        let fed = self.feed_forward.forward(x.clone());
        self.norm_forward.forward(x + self.dropout.forward(fed))
    }
}

/// Encoder-decoder translation model written from first principles: its
/// position table is a sinusoidal constant derived from the input rather
/// than a learned embedding placed on a device by the caller.
#[derive(Config)]
pub struct TransformerScratchConfig {
    hidden_size: usize,
    ffn_size: usize,
    vocab_size: usize,
    max_length: usize,
    pad_token: usize,
    heads: usize,
    depth: usize,
    dropout: f64,
}

impl TransformerScratchConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransformerScratch<B> {
        let encoder = (0..self.depth)
            .map(|_| {
                EncoderBlock::new(self.hidden_size, self.ffn_size, self.heads, self.dropout, device)
            })
            .collect();
        let decoder = (0..self.depth)
            .map(|_| {
                DecoderBlock::new(self.hidden_size, self.ffn_size, self.heads, self.dropout, device)
            })
            .collect();

        TransformerScratch {
            source_embedding: EmbeddingConfig::new(self.vocab_size, self.hidden_size).init(device),
            target_embedding: EmbeddingConfig::new(self.vocab_size, self.hidden_size).init(device),
            position_encoding: PositionalEncodingConfig::new(self.hidden_size)
                .with_max_sequence_size(self.max_length + 1)
                .init(device),
            embedding_dropout: DropoutConfig::new(self.dropout).init(),
            encoder,
            decoder,
            output: LinearConfig::new(self.hidden_size, self.vocab_size).init(device),
            vocab_size: self.vocab_size,
            pad_token: self.pad_token,
        }
    }
}

#[derive(Module, Debug)]
pub struct TransformerScratch<B: Backend> {
    source_embedding: Embedding<B>,
    target_embedding: Embedding<B>,
    position_encoding: PositionalEncoding<B>,
    embedding_dropout: Dropout,
    encoder: Vec<EncoderBlock<B>>,
    decoder: Vec<DecoderBlock<B>>,
    output: Linear<B>,
    vocab_size: usize,
    pad_token: usize,
}

impl<B: Backend> TransformerScratch<B> {
    pub const NAME: &'static str = "transformer_scratch";

    pub fn forward(&self, batch: TranslationBatch<B>) -> ClassificationOutput<B> {
        let [batch_size, _] = batch.source_tokens.dims();
        let [_, target_length] = batch.target_inputs.dims();
        let device = &self.devices()[0];

        let source_tokens = batch.source_tokens.to_device(device);
        let source_mask_pad = batch.source_mask_pad.to_device(device);
        let target_inputs = batch.target_inputs.to_device(device);
        let target_outputs = batch.target_outputs.to_device(device);
        let target_mask_pad = batch.target_mask_pad.to_device(device);

        let mut memory = self.embedding_dropout.forward(
            self.position_encoding
                .forward(self.source_embedding.forward(source_tokens)),
        );
        for block in &self.encoder {
            memory = block.forward(memory, source_mask_pad.clone());
        }

        let mask_attn = generate_autoregressive_mask::<B>(batch_size, target_length, device);
        let mut decoded = self.embedding_dropout.forward(
            self.position_encoding
                .forward(self.target_embedding.forward(target_inputs)),
        );
        for block in &self.decoder {
            decoded = block.forward(
                decoded,
                memory.clone(),
                mask_attn.clone(),
                target_mask_pad.clone(),
                source_mask_pad.clone(),
            );
        }

        let output = self.output.forward(decoded);
        let output_flatten = output.reshape([batch_size * target_length, self.vocab_size]);
        let targets_flatten = target_outputs.reshape([batch_size * target_length]);

        let loss = CrossEntropyLossConfig::new()
            .with_pad_tokens(Some(vec![self.pad_token]))
            .init(&output_flatten.device());
        let loss = loss.forward(output_flatten.clone(), targets_flatten.clone());

        ClassificationOutput {
            loss,
            output: output_flatten,
            targets: targets_flatten,
        }
    }
}

impl<B: Backend> TranslationModel<B> for TransformerScratch<B> {
    fn forward(&self, batch: TranslationBatch<B>) -> ClassificationOutput<B> {
        TransformerScratch::forward(self, batch)
    }
}

impl<B: AutodiffBackend> TrainStep<TranslationBatch<B>, ClassificationOutput<B>>
    for TransformerScratch<B>
{
    fn step(&self, item: TranslationBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward(item);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<TranslationBatch<B>, ClassificationOutput<B>>
    for TransformerScratch<B>
{
    fn step(&self, item: TranslationBatch<B>) -> ClassificationOutput<B> {
        self.forward(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tokenizer::{CharTokenizer, Tokenizer};
    use crate::data::{TranslationBatcher, TranslationItem};
    use burn::backend::ndarray::NdArray;
    use burn::data::dataloader::batcher::Batcher;
    use burn::tensor::ElementConversion;
    use std::sync::Arc;

    type TestBackend = NdArray<f32>;

    #[test]
    fn forward_yields_finite_loss_and_flat_logits() {
        let device = Default::default();
        let tokenizer = CharTokenizer::default();
        let vocab_size = tokenizer.vocab_size();
        let pad_token = tokenizer.pad_token();

        let max_length = 16;
        let model = TransformerScratchConfig::new(32, 64, vocab_size, max_length, pad_token, 4, 2, 0.0)
            .init::<TestBackend>(&device);

        let batcher = TranslationBatcher::<TestBackend>::new(
            Arc::new(CharTokenizer::default()),
            device,
            max_length,
        );
        let batch = batcher.batch(vec![
            TranslationItem::new("배가 고파요".into(), "I am hungry".into()),
            TranslationItem::new("잘 자요".into(), "Good night".into()),
        ]);
        let [batch_size, target_length] = batch.target_inputs.dims();

        let output = TranslationModel::forward(&model, batch);
        assert_eq!(output.output.dims(), [batch_size * target_length, vocab_size]);
        let loss: f64 = output.loss.into_scalar().elem();
        assert!(loss.is_finite());
    }
}
