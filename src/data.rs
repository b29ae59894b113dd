mod batcher;
mod dataset;
pub mod tokenizer;

pub use batcher::{TranslationBatch, TranslationBatcher};
pub use dataset::{Kor2EngDataset, Kor2EngSmallDataset, TranslationItem};
