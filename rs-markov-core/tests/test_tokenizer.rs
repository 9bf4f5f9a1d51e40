use rs_markov_core::tokenizer::{Tokenizer, WordTokenizer};

fn tokens(words: &[&str]) -> Vec<String> {
	words.iter().map(|w| w.to_string()).collect()
}

#[test]
fn test_words_and_punctuation() {
	assert_eq!(
		WordTokenizer.tokenize("Don't panic, it's fine."),
		tokens(&["Don't", "panic", ",", "it's", "fine", "."])
	);
	assert_eq!(
		WordTokenizer.tokenize("Wait... what?!"),
		tokens(&["Wait", ".", ".", ".", "what", "?", "!"])
	);
}

#[test]
fn test_symbols_and_whitespace_are_dropped() {
	assert!(WordTokenizer.tokenize("").is_empty());
	assert!(WordTokenizer.tokenize("  \t\n ").is_empty());
	assert!(WordTokenizer.tokenize("@@@ ### -- ()").is_empty());
	assert_eq!(WordTokenizer.tokenize("a + b = c"), tokens(&["a", "b", "c"]));
}

#[test]
fn test_detokenize_glues_punctuation() {
	let text = "Don't panic, it's fine.";
	assert_eq!(WordTokenizer.detokenize(&WordTokenizer.tokenize(text)), text);
	assert_eq!(WordTokenizer.detokenize(&tokens(&["hello", "world", "!"])), "hello world!");
	assert_eq!(WordTokenizer.detokenize(&[]), "");
}

#[test]
fn test_tokens_never_contain_spaces() {
	let text = "The quick brown fox; jumps over: the lazy dog's tail!";
	assert!(WordTokenizer.tokenize(text).iter().all(|t| !t.contains(' ')));
}

struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
	fn tokenize(&self, text: &str) -> Vec<String> {
		text.split_whitespace().map(String::from).collect()
	}
}

#[test]
fn test_default_detokenize_joins_with_spaces() {
	let tokenizer = WhitespaceTokenizer;
	assert_eq!(tokenizer.detokenize(&tokenizer.tokenize("a , b")), "a , b");
}
