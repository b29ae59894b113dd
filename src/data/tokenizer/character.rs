use super::Tokenizer;
use std::collections::HashMap;

/// Character-level tokenizer covering printable ASCII and the Hangul
/// syllable block, with [START], [END] and [PAD] appended to the vocab.
pub struct CharTokenizer {
    char_to_id: HashMap<char, usize>,
    id_to_char: HashMap<usize, char>,
    vocab_size: usize,
}

impl CharTokenizer {
    pub const NAME: &'static str = "character";
}

impl Default for CharTokenizer {
    fn default() -> Self {
        let mut chars: Vec<char> = (32u8..127).map(|i| i as char).collect();
        chars.push('\n');
        // Hangul syllables for the Korean side of the corpus
        chars.extend('\u{AC00}'..='\u{D7A3}');

        let char_to_id: HashMap<char, usize> =
            chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let id_to_char: HashMap<usize, char> =
            chars.iter().enumerate().map(|(i, &c)| (i, c)).collect();

        // Special tokens live at the end
        let vocab_size = chars.len() + 3;

        Self {
            char_to_id,
            id_to_char,
            vocab_size,
        }
    }
}

impl Tokenizer for CharTokenizer {
    fn encode(&self, value: &str, special_tokens: bool) -> Vec<usize> {
        let mut tokens = Vec::new();

        if special_tokens {
            tokens.push(self.start_token());
        }

        tokens.extend(
            value
                .chars()
                .map(|c| *self.char_to_id.get(&c).unwrap_or(&self.pad_token())),
        );

        if special_tokens {
            tokens.push(self.end_token());
        }

        tokens
    }

    fn decode(&self, tokens: &[usize]) -> String {
        tokens
            .iter()
            .filter_map(|id| self.id_to_char.get(id))
            .collect()
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn pad_token(&self) -> usize {
        self.vocab_size - 1
    }

    fn start_token(&self) -> usize {
        self.vocab_size - 3
    }

    fn end_token(&self) -> usize {
        self.vocab_size - 2
    }
}
