use std::collections::BTreeMap;

/// Represents a state in a word-level n-gram model.
///
/// A `State` corresponds to a fixed (n-1)-token window and stores all
/// observed transitions from this window to the next token. The window
/// itself is the key of the map holding the state.
///
/// Conceptually, this is a node in a Markov chain where outgoing edges
/// are weighted by their number of observations.
///
/// ## Responsibilities:
/// - Accumulate transition counts during learning and hydration
/// - Expose the normalized next-token distribution
///
/// ## Invariants
/// - Each transition count is strictly positive
/// - Transitions iterate in token order, which makes tie-breaking stable
#[derive(Clone, Debug, Default)]
pub struct State {
	/// Outgoing transitions indexed by the next token.
	/// Example: { "cat" => 42, "<END>" => 3 }
	transitions: BTreeMap<String, u64>
}

impl State {
	/// Records `count` occurrences of a transition toward `next_token`.
	///
	/// A zero count is ignored so the strictly-positive invariant holds.
	pub fn add_transition(&mut self, next_token: &str, count: u64) {
		if count == 0 {
			return;
		}
		*self.transitions.entry(next_token.to_owned()).or_insert(0) += count;
	}

	/// Raw count recorded for `next_token`, 0 if never observed.
	pub fn count(&self, next_token: &str) -> u64 {
		self.transitions.get(next_token).copied().unwrap_or(0)
	}

	/// Sum of all outgoing counts.
	pub fn total(&self) -> u64 {
		self.transitions.values().sum()
	}

	pub fn is_empty(&self) -> bool {
		self.transitions.is_empty()
	}

	/// Next-token probabilities normalized from raw counts, in token order.
	///
	/// Returns an empty vector if the state has no transitions.
	pub fn distribution(&self) -> Vec<(String, f64)> {
		let total = self.total();
		if total == 0 {
			return Vec::new();
		}
		self.transitions
			.iter()
			.map(|(token, count)| (token.clone(), *count as f64 / total as f64))
			.collect()
	}
}
