use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::config::Config;
use crate::error::{MarkovError, Result};
use crate::model::deltas::{TransitionDeltas, WindowBound};
use crate::model::sequence_model::validate_order;
use crate::storage::TransitionStore;
use crate::tokenizer::{Tokenizer, WordTokenizer};

/// Longest uninterrupted sleep, so a stop request is noticed quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Trains the higher orders from the stored corpus, off the request path.
///
/// # Responsibilities
/// - Fetch unprocessed messages per order, oldest first, in batches
/// - Count their transitions into a fresh accumulator per batch
/// - Persist the counts and advance the cursor in one transaction
///
/// # Invariants
/// - All progress lives in the store: a restarted processor resumes at the
///   first unprocessed message and never counts a message twice.
/// - Nothing in memory outlives a batch.
pub struct BackgroundProcessor {
	store: Arc<TransitionStore>,
	orders: Vec<usize>,
	batch_size: usize,
	poll_interval: Duration,
	bound: WindowBound,
	tokenizer: Box<dyn Tokenizer>,
}

impl BackgroundProcessor {
	/// # Errors
	/// - An order outside `2..=10`
	/// - `batch_size == 0`
	pub fn new(store: Arc<TransitionStore>, orders: Vec<usize>, batch_size: usize) -> Result<Self> {
		for order in &orders {
			validate_order(*order)?;
		}
		if batch_size == 0 {
			return Err(MarkovError::InvalidArgument("batch_size must be at least 1".to_owned()));
		}

		Ok(Self {
			store,
			orders,
			batch_size,
			poll_interval: Duration::from_secs(10),
			bound: WindowBound::default(),
			tokenizer: Box::new(WordTokenizer),
		})
	}

	/// Processor for the background orders of `config`.
	pub fn from_config(store: Arc<TransitionStore>, config: &Config) -> Result<Self> {
		let processor = Self::new(store, config.background_orders.clone(), config.batch_size)?
			.with_poll_interval(config.poll_interval())
			.with_window_bound(config.window_bound);
		Ok(processor)
	}

	pub fn with_tokenizer<T: Tokenizer + 'static>(mut self, tokenizer: T) -> Self {
		self.tokenizer = Box::new(tokenizer);
		self
	}

	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	pub fn with_window_bound(mut self, bound: WindowBound) -> Self {
		self.bound = bound;
		self
	}

	pub fn orders(&self) -> &[usize] {
		&self.orders
	}

	/// Processes at most one batch of pending messages for `order`.
	///
	/// Messages without tokens are marked processed along with the others.
	/// On error the whole batch is rolled back and stays pending.
	///
	/// Returns the number of messages processed.
	pub fn process_batch(&self, order: usize) -> Result<usize> {
		let messages = self.store.get_unprocessed(order, self.batch_size)?;
		if messages.is_empty() {
			return Ok(0);
		}

		let mut deltas = TransitionDeltas::new(order);
		for message in &messages {
			let tokens = self.tokenizer.tokenize(&message.content);
			deltas.record_tokens(&tokens, self.bound);
		}

		let ids: Vec<i64> = messages.iter().map(|message| message.id).collect();
		self.store.commit_batch(&deltas.rows(), order, &ids)?;
		debug!(
			"order {order}: processed {} messages ({} distinct transitions)",
			ids.len(),
			deltas.len()
		);

		Ok(ids.len())
	}

	/// One pass: at most one batch per order.
	///
	/// Returns the number of messages processed per order.
	pub fn run_once(&self) -> Result<BTreeMap<usize, usize>> {
		let mut processed = BTreeMap::new();
		for order in &self.orders {
			processed.insert(*order, self.process_batch(*order)?);
		}
		Ok(processed)
	}

	/// Repeats `run_once` until no order returns a full batch, without
	/// sleeping in between.
	///
	/// Meant for one-shot runs and bulk imports, not for a server sharing
	/// the database. Returns the totals per order.
	pub fn drain(&self) -> Result<BTreeMap<usize, usize>> {
		let mut totals: BTreeMap<usize, usize> = self.orders.iter().map(|order| (*order, 0)).collect();
		loop {
			let pass = self.run_once()?;
			for (order, count) in &pass {
				*totals.entry(*order).or_default() += count;
			}
			if pass.values().all(|count| *count < self.batch_size) {
				return Ok(totals);
			}
		}
	}

	/// Runs until `stop` is set: one batch per order, then a `poll_interval`
	/// sleep.
	///
	/// Storage errors are logged and the pass is retried after the next
	/// sleep.
	pub fn run(&self, stop: &AtomicBool) {
		info!(
			"background processor started: orders {:?}, batch size {}, interval {:?}",
			self.orders, self.batch_size, self.poll_interval
		);

		while !stop.load(Ordering::Relaxed) {
			match self.run_once() {
				Ok(processed) => {
					let total: usize = processed.values().sum();
					if total > 0 {
						info!("processed {total} messages: {processed:?}");
						self.log_progress();
					}
				}
				Err(e) => error!("background pass failed, retrying: {e}"),
			}
			self.sleep(stop);
		}

		info!("background processor stopped");
	}

	fn log_progress(&self) {
		match self.store.processing_stats() {
			Ok(stats) => {
				for (order, s) in stats {
					info!("order {order}: {}/{} processed, {} pending", s.processed, s.total, s.pending);
				}
			}
			Err(e) => error!("could not read processing stats: {e}"),
		}
	}

	fn sleep(&self, stop: &AtomicBool) {
		let deadline = Instant::now() + self.poll_interval;
		while !stop.load(Ordering::Relaxed) {
			let now = Instant::now();
			if now >= deadline {
				break;
			}
			thread::sleep(SLEEP_SLICE.min(deadline - now));
		}
	}
}
