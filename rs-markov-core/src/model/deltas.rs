use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::TransitionRow;
use super::sequence_model::{join_state, END_TOKEN, START_TOKEN};

/// Which windows of a padded sequence produce transitions.
///
/// For `order = 2` and tokens `["the", "cat", "sat"]` the padded sequence is
/// `["<START>", "the", "cat", "sat", "<END>"]`:
/// - `IncludeEnd` records 4 transitions, the last one being `sat -> <END>`.
/// - `Legacy` records only the first 3 (`len - order` windows) and never
///   learns the final transition into `<END>`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowBound {
	#[default]
	IncludeEnd,
	/// Bound used by ledgers built before END transitions were learned.
	Legacy,
}

impl WindowBound {
	/// Number of windows for a padded sequence of `len` elements.
	fn window_count(self, len: usize, order: usize) -> usize {
		match self {
			WindowBound::IncludeEnd => (len + 1).saturating_sub(order),
			WindowBound::Legacy => len.saturating_sub(order),
		}
	}
}

/// Transition counts learned by one training call or one background batch.
///
/// An accumulator is scoped to a single flush: build it, persist its
/// `rows()`, drop it. Nothing carries over between batches, so the same
/// tokens are never counted twice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransitionDeltas {
	order: usize,
	counts: BTreeMap<(String, String), u64>,
}

impl TransitionDeltas {
	pub fn new(order: usize) -> Self {
		Self { order, counts: BTreeMap::new() }
	}

	/// Builds the deltas of a single token sequence.
	pub fn from_tokens(tokens: &[String], order: usize, bound: WindowBound) -> Self {
		let mut deltas = Self::new(order);
		deltas.record_tokens(tokens, bound);
		deltas
	}

	pub fn order(&self) -> usize {
		self.order
	}

	/// Pads `tokens` with `order - 1` START sentinels and one END sentinel,
	/// then records every window of length `order`.
	///
	/// No-op on empty input.
	pub fn record_tokens(&mut self, tokens: &[String], bound: WindowBound) {
		if tokens.is_empty() || self.order < 2 {
			return;
		}

		let mut sequence: Vec<&str> = Vec::with_capacity(tokens.len() + self.order);
		sequence.extend(std::iter::repeat_n(START_TOKEN, self.order - 1));
		sequence.extend(tokens.iter().map(String::as_str));
		sequence.push(END_TOKEN);

		for i in 0..bound.window_count(sequence.len(), self.order) {
			let state = join_state(&sequence[i..i + self.order - 1]);
			let next_token = sequence[i + self.order - 1];
			self.record(&state, next_token, 1);
		}
	}

	pub fn record(&mut self, state: &str, next_token: &str, count: u64) {
		if count == 0 {
			return;
		}
		*self.counts.entry((state.to_owned(), next_token.to_owned())).or_insert(0) += count;
	}

	/// Sums another accumulator of the same order into this one.
	///
	/// # Errors
	/// Returns an error if the orders do not match.
	pub fn merge(&mut self, other: &Self) -> Result<(), String> {
		if self.order != other.order {
			return Err("Order mismatch".to_owned());
		}
		for ((state, next_token), count) in &other.counts {
			*self.counts.entry((state.clone(), next_token.clone())).or_insert(0) += *count;
		}
		Ok(())
	}

	/// Count recorded for one transition, 0 if absent.
	pub fn count(&self, state: &str, next_token: &str) -> u64 {
		self.counts
			.get(&(state.to_owned(), next_token.to_owned()))
			.copied()
			.unwrap_or(0)
	}

	/// Distinct transitions recorded.
	pub fn len(&self) -> usize {
		self.counts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.counts.is_empty()
	}

	/// Sum of all recorded counts.
	pub fn total(&self) -> u64 {
		self.counts.values().sum()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u64)> {
		self.counts
			.iter()
			.map(|((state, next_token), count)| (state.as_str(), next_token.as_str(), *count))
	}

	/// Ledger rows ready for a batch merge.
	pub fn rows(&self) -> Vec<TransitionRow> {
		self.iter()
			.map(|(state, next_token, count)| TransitionRow {
				order: self.order,
				state: state.to_owned(),
				next_token: next_token.to_owned(),
				count,
			})
			.collect()
	}
}
