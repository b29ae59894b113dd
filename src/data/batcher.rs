use super::{dataset::TranslationItem, tokenizer::Tokenizer};
use burn::{data::dataloader::batcher::Batcher, nn::attention::generate_padding_mask, prelude::*};
use std::sync::Arc;

#[derive(Clone, new)]
pub struct TranslationBatcher<B: Backend> {
    tokenizer: Arc<dyn Tokenizer>,
    device: B::Device,
    max_length: usize,
}

#[derive(Debug, Clone, new)]
pub struct TranslationBatch<B: Backend> {
    pub source_tokens: Tensor<B, 2, Int>,   // Korean token ids [batch_size, src_len]
    pub source_mask_pad: Tensor<B, 2, Bool>, // [batch_size, src_len]
    pub target_inputs: Tensor<B, 2, Int>,   // English ids fed to the decoder [batch_size, tgt_len]
    pub target_outputs: Tensor<B, 2, Int>,  // Same ids shifted by one [batch_size, tgt_len]
    pub target_mask_pad: Tensor<B, 2, Bool>, // [batch_size, tgt_len]
}

impl<B: Backend> Batcher<TranslationItem, TranslationBatch<B>> for TranslationBatcher<B> {
    fn batch(&self, items: Vec<TranslationItem>) -> TranslationBatch<B> {
        let mut source_list = Vec::with_capacity(items.len());
        let mut target_list = Vec::with_capacity(items.len());

        for item in items {
            let mut source = self.tokenizer.encode(&item.kor, false);
            source.truncate(self.max_length);

            // Target carries start/end markers; one extra position so the
            // shifted views still cover max_length tokens.
            let mut target = self.tokenizer.encode(&item.eng, true);
            target.truncate(self.max_length + 1);

            source_list.push(source);
            target_list.push(target);
        }

        let source = generate_padding_mask(
            self.tokenizer.pad_token(),
            source_list,
            Some(self.max_length),
            &self.device,
        );
        let target = generate_padding_mask(
            self.tokenizer.pad_token(),
            target_list,
            Some(self.max_length + 1),
            &self.device,
        );

        let [batch_size, target_length] = target.tensor.dims();

        TranslationBatch::new(
            source.tensor,
            source.mask,
            target
                .tensor
                .clone()
                .slice([0..batch_size, 0..target_length - 1]),
            target.tensor.slice([0..batch_size, 1..target_length]),
            target.mask.slice([0..batch_size, 0..target_length - 1]),
        )
    }
}
