use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread;

use crate::error::{MarkovError, Result};
use crate::tokenizer::Tokenizer;
use super::deltas::{TransitionDeltas, WindowBound};

/// Learns a batch of texts for several orders at once, in parallel.
///
/// # Behavior
/// - Splits the texts into chunks (based on CPU cores * factor).
/// - Spawns a scoped thread per chunk; each tokenizes its texts once and
///   records them into one partial accumulator per order.
/// - Merges all partial accumulators sequentially.
///
/// # Notes
/// - Uses an MPSC channel to collect partial results from threads.
/// - The result equals training every text one after the other.
pub(crate) fn build_deltas(
	texts: &[String],
	tokenizer: &dyn Tokenizer,
	orders: &[usize],
	bound: WindowBound,
) -> Result<BTreeMap<usize, TransitionDeltas>> {
	let mut merged: BTreeMap<usize, TransitionDeltas> =
		orders.iter().map(|order| (*order, TransitionDeltas::new(*order))).collect();
	if texts.is_empty() || orders.is_empty() {
		return Ok(merged);
	}

	let cpus = num_cpus::get();
	let factor = 8;
	let chunks = cpus * factor;
	let chunk_size = texts.len().div_ceil(chunks);

	let (tx, rx) = mpsc::channel();
	thread::scope(|scope| {
		for chunk in texts.chunks(chunk_size) {
			let tx = tx.clone();
			scope.spawn(move || {
				let mut partial: BTreeMap<usize, TransitionDeltas> =
					orders.iter().map(|order| (*order, TransitionDeltas::new(*order))).collect();
				for text in chunk {
					let tokens = tokenizer.tokenize(text);
					for deltas in partial.values_mut() {
						deltas.record_tokens(&tokens, bound);
					}
				}
				// The receiver outlives the scope, sending cannot fail
				let _ = tx.send(partial);
			});
		}
	});
	drop(tx);

	for partial in rx.iter() {
		for (order, deltas) in partial {
			if let Some(existing) = merged.get_mut(&order) {
				existing.merge(&deltas).map_err(MarkovError::InvalidArgument)?;
			}
		}
	}

	Ok(merged)
}
