use crate::data::TranslationBatch;
use burn::{
    nn::{
        attention::generate_autoregressive_mask,
        loss::CrossEntropyLossConfig,
        transformer::{
            TransformerDecoder, TransformerDecoderConfig, TransformerDecoderInput,
            TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput,
        },
        Embedding, EmbeddingConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

pub mod attention;
pub mod mlp;
pub mod scratch;

/// Common surface of the dispatchable translation transformers.
pub trait TranslationModel<B: Backend> {
    fn forward(&self, batch: TranslationBatch<B>) -> ClassificationOutput<B>;
}

/// Encoder-decoder translation model assembled from burn's transformer
/// modules, with learned positional embeddings.
#[derive(Config)]
pub struct TransformerBuiltinConfig {
    encoder: TransformerEncoderConfig,
    decoder: TransformerDecoderConfig,
    vocab_size: usize,
    pad_token: usize,
    max_length: usize,
}

impl TransformerBuiltinConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransformerBuiltin<B> {
        let d_model = self.encoder.d_model;
        TransformerBuiltin {
            encoder: self.encoder.init(device),
            decoder: self.decoder.init(device),
            source_embedding: EmbeddingConfig::new(self.vocab_size, d_model).init(device),
            target_embedding: EmbeddingConfig::new(self.vocab_size, d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_length + 1, d_model).init(device),
            output: LinearConfig::new(d_model, self.vocab_size).init(device),
            vocab_size: self.vocab_size,
            pad_token: self.pad_token,
        }
    }
}

#[derive(Module, Debug)]
pub struct TransformerBuiltin<B: Backend> {
    encoder: TransformerEncoder<B>,
    decoder: TransformerDecoder<B>,
    source_embedding: Embedding<B>,
    target_embedding: Embedding<B>,
    position_embedding: Embedding<B>,
    output: Linear<B>,
    vocab_size: usize,
    pad_token: usize,
}

impl<B: Backend> TransformerBuiltin<B> {
    pub const NAME: &'static str = "transformer_builtin";

    pub fn forward(&self, batch: TranslationBatch<B>) -> ClassificationOutput<B> {
        let [batch_size, source_length] = batch.source_tokens.dims();
        let [_, target_length] = batch.target_inputs.dims();
        let device = &self.devices()[0];

        let source_tokens = batch.source_tokens.to_device(device);
        let source_mask_pad = batch.source_mask_pad.to_device(device);
        let target_inputs = batch.target_inputs.to_device(device);
        let target_outputs = batch.target_outputs.to_device(device);
        let target_mask_pad = batch.target_mask_pad.to_device(device);

        let source_positions = Tensor::arange(0..source_length as i64, device)
            .reshape([1, source_length])
            .repeat_dim(0, batch_size);
        let source_embedding = self.source_embedding.forward(source_tokens)
            + self.position_embedding.forward(source_positions);

        let memory = self.encoder.forward(
            TransformerEncoderInput::new(source_embedding).mask_pad(source_mask_pad.clone()),
        );

        let target_positions = Tensor::arange(0..target_length as i64, device)
            .reshape([1, target_length])
            .repeat_dim(0, batch_size);
        let target_embedding = self.target_embedding.forward(target_inputs)
            + self.position_embedding.forward(target_positions);

        let mask_attn = generate_autoregressive_mask::<B>(batch_size, target_length, device);
        let decoded = self.decoder.forward(
            TransformerDecoderInput::new(target_embedding, memory)
                .target_mask_pad(target_mask_pad)
                .target_mask_attn(mask_attn)
                .memory_mask_pad(source_mask_pad),
        );

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

impl<B: Backend> TranslationModel<B> for TransformerBuiltin<B> {
    fn forward(&self, batch: TranslationBatch<B>) -> ClassificationOutput<B> {
        TransformerBuiltin::forward(self, batch)
    }
}

impl<B: AutodiffBackend> TrainStep<TranslationBatch<B>, ClassificationOutput<B>>
    for TransformerBuiltin<B>
{
    fn step(&self, item: TranslationBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward(item);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<TranslationBatch<B>, ClassificationOutput<B>>
    for TransformerBuiltin<B>
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
        let encoder = TransformerEncoderConfig::new(32, 64, 4, 2).with_norm_first(false);
        let decoder = TransformerDecoderConfig::new(32, 64, 4, 2).with_norm_first(false);
        let model = TransformerBuiltinConfig::new(encoder, decoder, vocab_size, pad_token, max_length)
            .init::<TestBackend>(&device);

        let batcher = TranslationBatcher::<TestBackend>::new(
            Arc::new(CharTokenizer::default()),
            device,
            max_length,
        );
        let batch = batcher.batch(vec![
            TranslationItem::new("안녕하세요".into(), "Hello".into()),
            TranslationItem::new("내일 봐요".into(), "See you tomorrow".into()),
        ]);
        let [batch_size, target_length] = batch.target_inputs.dims();

        let output = TranslationModel::forward(&model, batch);
        assert_eq!(output.output.dims(), [batch_size * target_length, vocab_size]);
        let loss: f64 = output.loss.into_scalar().elem();
        assert!(loss.is_finite());
    }
}
