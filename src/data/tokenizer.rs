mod character;

pub use character::CharTokenizer;

use crate::tracking;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids, bracketing with start/end tokens when
    /// `special_tokens` is set.
    fn encode(&self, value: &str, special_tokens: bool) -> Vec<usize>;
    fn decode(&self, tokens: &[usize]) -> String;
    fn vocab_size(&self) -> usize;
    fn pad_token(&self) -> usize;
    fn start_token(&self) -> usize;
    fn end_token(&self) -> usize;
}

/// A tokenizer trained elsewhere, loaded from a logged artifact or pulled
/// from the hub.
pub struct PretrainedTokenizer {
    tokenizer: tokenizers::Tokenizer,
    pad_token: usize,
    start_token: usize,
    end_token: usize,
}

impl PretrainedTokenizer {
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn Error>> {
        Self::wrap(tokenizers::Tokenizer::from_file(path).map_err(|e| e as Box<dyn Error>)?)
    }

    pub fn from_pretrained(identifier: &str) -> Result<Self, Box<dyn Error>> {
        Self::wrap(
            tokenizers::Tokenizer::from_pretrained(identifier, None)
                .map_err(|e| e as Box<dyn Error>)?,
        )
    }

    fn wrap(tokenizer: tokenizers::Tokenizer) -> Result<Self, Box<dyn Error>> {
        let lookup = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| tokenizer.token_to_id(name))
                .map(|id| id as usize)
        };
        let pad_token =
            lookup(&["[PAD]", "<pad>"]).ok_or("tokenizer defines no padding token")?;
        let start_token =
            lookup(&["[BOS]", "<s>", "[CLS]"]).ok_or("tokenizer defines no start token")?;
        let end_token =
            lookup(&["[EOS]", "</s>", "[SEP]"]).ok_or("tokenizer defines no end token")?;
        Ok(Self {
            tokenizer,
            pad_token,
            start_token,
            end_token,
        })
    }
}

impl Tokenizer for PretrainedTokenizer {
    fn encode(&self, value: &str, special_tokens: bool) -> Vec<usize> {
        let mut tokens = Vec::new();
        if special_tokens {
            tokens.push(self.start_token);
        }
        let encoding = self
            .tokenizer
            .encode(value, false)
            .expect("failed to encode text");
        tokens.extend(encoding.get_ids().iter().map(|&id| id as usize));
        if special_tokens {
            tokens.push(self.end_token);
        }
        tokens
    }

    fn decode(&self, tokens: &[usize]) -> String {
        let ids: Vec<u32> = tokens.iter().map(|&token| token as u32).collect();
        self.tokenizer.decode(&ids, true).unwrap_or_default()
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    fn pad_token(&self) -> usize {
        self.pad_token
    }

    fn start_token(&self) -> usize {
        self.start_token
    }

    fn end_token(&self) -> usize {
        self.end_token
    }
}

/// Resolve the tokenizer named in the config: the built-in character
/// tokenizer, a previously logged artifact, or a pretrained download.
pub fn fetch_tokenizer(
    root: &Path,
    entity: &str,
    name: &str,
) -> Result<Arc<dyn Tokenizer>, Box<dyn Error>> {
    if name == CharTokenizer::NAME {
        return Ok(Arc::new(CharTokenizer::default()));
    }
    let local = tracking::artifact_dir(root, entity, name).join("tokenizer.json");
    if local.exists() {
        log::info!("loading tokenizer artifact from {}", local.display());
        return Ok(Arc::new(PretrainedTokenizer::from_file(&local)?));
    }
    log::info!("no local artifact for {name}, fetching pretrained tokenizer");
    Ok(Arc::new(PretrainedTokenizer::from_pretrained(name)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokenizers::models::wordlevel::WordLevel;

    #[test]
    fn character_name_resolves_without_touching_the_store() {
        let root = std::env::temp_dir().join("kor2eng-no-such-store");
        let tokenizer = fetch_tokenizer(&root, "iseul", CharTokenizer::NAME).unwrap();
        assert!(tokenizer.vocab_size() > 0);
    }

    fn word_level() -> PretrainedTokenizer {
        let vocab: HashMap<String, u32> = [("[PAD]", 0), ("[BOS]", 1), ("[EOS]", 2), ("hello", 3)]
            .into_iter()
            .map(|(token, id)| (token.to_string(), id))
            .collect();
        let model = WordLevel::builder().vocab(vocab).build().unwrap();
        PretrainedTokenizer::wrap(tokenizers::Tokenizer::new(model)).unwrap()
    }

    #[test]
    fn pretrained_encode_brackets_with_specials() {
        let tokenizer = word_level();
        assert_eq!(tokenizer.encode("hello", false), vec![3]);
        assert_eq!(tokenizer.encode("hello", true), vec![1, 3, 2]);
    }

    #[test]
    #[should_panic(expected = "failed to encode")]
    fn pretrained_encode_rejects_untokenizable_text() {
        // the word-level model carries no unknown token, so out-of-vocab
        // input must fail loudly instead of producing an empty sequence
        word_level().encode("bye", false);
    }
}
