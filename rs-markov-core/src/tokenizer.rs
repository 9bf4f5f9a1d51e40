use std::sync::LazyLock;

use regex::Regex;

/// Words (with an optional apostrophe suffix) and sentence punctuation.
static WORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	// Constant pattern, cannot fail to compile
	Regex::new(r"\b\w+(?:'\w+)?\b|[.!?,;:]").unwrap()
});

const PUNCTUATION: [&str; 6] = [".", "!", "?", ",", ";", ":"];

/// Turns raw text into the token sequences the models learn from.
///
/// Tokens must not contain the state separator (a single space), otherwise
/// two different windows could join into the same state key.
pub trait Tokenizer: Send + Sync {
	fn tokenize(&self, text: &str) -> Vec<String>;

	/// Joins generated tokens back into text.
	fn detokenize(&self, tokens: &[String]) -> String {
		tokens.join(" ")
	}
}

/// Word-level tokenizer: words and contractions, punctuation split off.
///
/// `"Don't panic, it's fine."` → `["Don't", "panic", ",", "it's", "fine", "."]`
#[derive(Clone, Copy, Debug, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
	fn tokenize(&self, text: &str) -> Vec<String> {
		WORD_PATTERN
			.find_iter(text)
			.map(|m| m.as_str().to_owned())
			.collect()
	}

	/// Punctuation sticks to the preceding token, everything else is
	/// space-separated.
	fn detokenize(&self, tokens: &[String]) -> String {
		let mut text = String::new();
		for (i, token) in tokens.iter().enumerate() {
			if i > 0 && !PUNCTUATION.contains(&token.as_str()) {
				text.push(' ');
			}
			text.push_str(token);
		}
		text
	}
}
