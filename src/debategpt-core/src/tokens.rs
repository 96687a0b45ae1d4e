//! Token counting.
//!
//! Everything that budgets tokens goes through [`TokenCounter`], so tests can
//! count with a predictable stand-in while real runs use the model's BPE.

use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};
use tracing::debug;

use crate::error::{DebateGptError, Result};

pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize;
}

/// BPE token counter for an OpenAI model family.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Counter for `encoding_model`, e.g. `gpt-3.5-turbo` or `gpt-4`.
    ///
    /// `cl100k_base` is also accepted directly for models served elsewhere that
    /// reuse the GPT-3.5 vocabulary for budgeting.
    pub fn for_model(encoding_model: &str) -> Result<Self> {
        let bpe = match encoding_model {
            "cl100k_base" => cl100k_base(),
            model => get_bpe_from_model(model),
        }
        .map_err(|e| {
            DebateGptError::Tokenizer(format!("no encoding for '{encoding_model}': {e}"))
        })?;
        debug!(encoding_model, "Loaded tokenizer");
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }
}

/// Counts whitespace-separated words. Used where exact BPE counts would make
/// fixtures opaque.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_counter() {
        assert_eq!(WordCounter.count(""), 0);
        assert_eq!(WordCounter.count("one two  three\n"), 3);
    }

    #[test]
    fn test_tiktoken_counter() {
        let counter = TiktokenCounter::for_model("gpt-3.5-turbo").unwrap();
        assert_eq!(counter.count(""), 0);
        assert!(counter.count("Abortion should be legal.") > 0);
    }

    #[test]
    fn test_unknown_encoding_model() {
        assert!(TiktokenCounter::for_model("definitely-not-a-model").is_err());
    }
}
