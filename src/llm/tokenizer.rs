//! Token counting and budget-aware truncation (§4.3 step 2).
//!
//! Uses `tiktoken-rs`'s `cl100k_base` encoding as a model-agnostic
//! approximation for every provider this layer talks to — good enough for
//! budgeting and truncation, not for billing-accurate counts (a known
//! simplification, see DESIGN.md).

use tiktoken_rs::CoreBPE;

pub struct Tokenizer {
    bpe: CoreBPE,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            bpe: tiktoken_rs::cl100k_base().expect("cl100k_base encoding tables are bundled with tiktoken-rs"),
        }
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Truncates `text` from the tail so its token count fits within
    /// `budget`, returning the whole string unchanged if it already fits.
    pub fn truncate_to_budget(&self, text: &str, budget: usize) -> String {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= budget {
            return text.to_string();
        }
        let kept = &tokens[..budget];
        self.bpe
            .decode(kept.to_vec())
            .unwrap_or_else(|_| text.chars().take(budget * 4).collect())
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_nonzero_for_nonempty_text() {
        let tokenizer = Tokenizer::new();
        assert!(tokenizer.count("hello, world") > 0);
    }

    #[test]
    fn truncation_discards_the_tail() {
        let tokenizer = Tokenizer::new();
        let text = "one two three four five six seven eight nine ten";
        let full = tokenizer.count(text);
        let truncated = tokenizer.truncate_to_budget(text, full - 2);
        assert!(tokenizer.count(&truncated) <= full - 2 + 1);
        assert!(text.starts_with(truncated.split_whitespace().next().unwrap_or("")));
    }

    #[test]
    fn text_within_budget_is_unchanged() {
        let tokenizer = Tokenizer::new();
        let text = "short text";
        assert_eq!(tokenizer.truncate_to_budget(text, 1000), text);
    }
}
