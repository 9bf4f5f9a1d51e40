use std::collections::{HashMap, VecDeque};

use log::debug;
use rand::Rng;

use crate::error::{MarkovError, Result};
use crate::storage::TransitionStore;
use super::deltas::{TransitionDeltas, WindowBound};
use super::generation_params::GenerationParams;
use super::sampler::{self, Distribution};
use super::state::State;

/// Sentinel padding the beginning of every training sequence.
pub const START_TOKEN: &str = "<START>";
/// Sentinel closing every training sequence. Never emitted by generation.
pub const END_TOKEN: &str = "<END>";
/// Separator used to join a token window into a state key.
pub const STATE_SEPARATOR: &str = " ";

/// Smallest and largest supported n-gram order.
pub const MIN_ORDER: usize = 2;
pub const MAX_ORDER: usize = 10;

/// Joins a token window into its state key.
///
/// Deterministic and order-preserving: identical windows always produce
/// identical keys.
pub fn join_state<S: AsRef<str>>(tokens: &[S]) -> String {
	let parts: Vec<&str> = tokens.iter().map(|token| token.as_ref()).collect();
	parts.join(STATE_SEPARATOR)
}

/// The all-START state of an order (`order - 1` sentinels).
pub fn start_state(order: usize) -> String {
	join_state(&vec![START_TOKEN; order.saturating_sub(1)])
}

/// Checks that `order` is within `MIN_ORDER..=MAX_ORDER`.
pub fn validate_order(order: usize) -> Result<()> {
	if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
		return Err(MarkovError::InvalidOrder(order));
	}
	Ok(())
}

/// Word-level n-gram model for one order.
///
/// The `SequenceModel` holds the current view of every transition count for
/// its order (ledger rows and compacted cache summed) and samples new token
/// sequences from it.
///
/// # Responsibilities
/// - Hydrate counts from the transition store
/// - Learn from token sequences, returning the deltas to persist
/// - Expose normalized next-token distributions
/// - Generate token sequences with temperature, top-k and length bias
///
/// # Invariants
/// - `order` is always within `2..=10`
/// - Each state in `states` is keyed by a joined window of `order - 1` tokens
/// - All state transitions have counts >= 1
#[derive(Clone, Debug)]
pub struct SequenceModel {
	/// The order of the model (tokens per n-gram)
	order: usize,

	/// Mapping from a joined window (length order-1) to its state
	states: HashMap<String, State>,
}

impl SequenceModel {
	/// Creates an empty model of the given order.
	///
	/// # Errors
	/// Returns an error if `order` is outside `2..=10`.
	pub fn new(order: usize) -> Result<Self> {
		validate_order(order)?;
		Ok(Self { order, states: HashMap::new() })
	}

	/// Builds a model from everything the store holds for `order`:
	/// ledger rows plus compacted distributions, summed by key.
	pub fn hydrate(store: &TransitionStore, order: usize) -> Result<Self> {
		let mut model = Self::new(order)?;

		for row in store.load_all(order)? {
			model.add_count(&row.state, &row.next_token, row.count);
		}
		for compacted in store.load_compacted(order)? {
			for (next_token, count) in &compacted.distribution {
				model.add_count(&compacted.state, next_token, *count);
			}
		}

		debug!("hydrated order {} with {} states", order, model.states.len());
		Ok(model)
	}

	pub fn order(&self) -> usize {
		self.order
	}

	pub fn state_count(&self) -> usize {
		self.states.len()
	}

	/// Whether `state` has at least one outgoing transition.
	pub fn contains_state(&self, state: &str) -> bool {
		self.states.get(state).is_some_and(|s| !s.is_empty())
	}

	/// Raw count of one transition, 0 if never observed.
	pub fn count(&self, state: &str, next_token: &str) -> u64 {
		self.states.get(state).map_or(0, |s| s.count(next_token))
	}

	fn add_count(&mut self, state: &str, next_token: &str, count: u64) {
		self.states
			.entry(state.to_owned())
			.or_default()
			.add_transition(next_token, count);
	}

	/// Learns a token sequence.
	///
	/// Returns the deltas that were absorbed so the caller can persist exactly
	/// what the model learned. Empty input yields empty deltas.
	pub fn train(&mut self, tokens: &[String], bound: WindowBound) -> TransitionDeltas {
		let deltas = TransitionDeltas::from_tokens(tokens, self.order, bound);
		self.absorb(&deltas);
		deltas
	}

	/// Adds already-computed deltas to the in-memory counts.
	///
	/// Deltas of another order are ignored.
	pub fn absorb(&mut self, deltas: &TransitionDeltas) {
		if deltas.order() != self.order {
			return;
		}
		for (state, next_token, count) in deltas.iter() {
			self.add_count(state, next_token, count);
		}
	}

	/// Next-token probabilities for `state`, normalized from raw counts.
	///
	/// Returns an empty distribution if the state is unknown.
	pub fn distribution(&self, state: &str) -> Distribution {
		self.states.get(state).map(State::distribution).unwrap_or_default()
	}

	/// Generates a token sequence starting from `seed_state`.
	///
	/// # Behavior
	/// - An empty seed starts from the all-START state.
	/// - Stops when the current state has no transitions, when `<END>` is
	///   drawn (not emitted), or after `params.max_tokens` tokens.
	/// - After each token the window slides: the oldest token is dropped and
	///   the new one appended.
	pub fn generate<R: Rng + ?Sized>(&self, seed_state: &str, params: &GenerationParams, rng: &mut R) -> Vec<String> {
		let seed = if seed_state.is_empty() {
			start_state(self.order)
		} else {
			seed_state.to_owned()
		};

		let mut window: VecDeque<String> = seed
			.split(STATE_SEPARATOR)
			.map(str::to_owned)
			.collect();
		let mut current_state = seed;
		let mut generated: Vec<String> = Vec::new();

		while generated.len() < params.max_tokens {
			let distribution = self.distribution(&current_state);
			if distribution.is_empty() {
				break;
			}

			let next_token = match sampler::sample_next(distribution, generated.len(), params, rng) {
				Some(token) if token != END_TOKEN => token,
				_ => break,
			};

			window.pop_front();
			window.push_back(next_token.clone());
			current_state = join_state(&window.iter().collect::<Vec<_>>());
			generated.push(next_token);
		}

		generated
	}

	/// Same as `generate`, with tokens joined by a single space.
	pub fn generate_text<R: Rng + ?Sized>(&self, seed_state: &str, params: &GenerationParams, rng: &mut R) -> String {
		self.generate(seed_state, params, rng).join(STATE_SEPARATOR)
	}
}
