use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use rand::Rng;

use crate::config::{Config, Mode};
use crate::error::{MarkovError, Result};
use crate::io;
use crate::policy::{OutputPolicy, PassThrough};
use crate::storage::{CompactionReport, NewMessage, ProcessingStats, StoreStats, TransitionRow, TransitionStore};
use crate::tokenizer::{Tokenizer, WordTokenizer};
use super::corpus;
use super::deltas::TransitionDeltas;
use super::generation_params::GenerationParams;
use super::sequence_model::{join_state, start_state, SequenceModel, START_TOKEN};

/// Column holding the text of CSV files found by `import_file`.
const CSV_CONTENT_COLUMN: &str = "content";

/// Request-path orchestrator over every configured order.
///
/// # Responsibilities
/// - Hold one in-memory `SequenceModel` per order, hydrated from the store
/// - Train the synchronous orders on ingestion and persist what they learned
/// - Leave the background orders pending for the `BackgroundProcessor`
/// - Generate text, backing off to lower orders when a model has nothing to say
///
/// # Invariants
/// - In-memory counts of a synchronous order never run ahead of the store:
///   deltas are absorbed only once their transaction has committed.
/// - Background orders only change in memory through `refresh`.
pub struct Generator {
	store: Arc<TransitionStore>,
	config: Config,
	models: BTreeMap<usize, SequenceModel>,
	tokenizer: Box<dyn Tokenizer>,
	policy: Box<dyn OutputPolicy>,
	ingested_since_compaction: usize,
}

impl Generator {
	/// Creates a generator and hydrates a model for every configured order.
	///
	/// # Errors
	/// - Invalid configuration
	/// - Storage failure while loading ledger rows or compacted states
	pub fn new(store: Arc<TransitionStore>, config: Config) -> Result<Self> {
		config.validate()?;

		let mut models = BTreeMap::new();
		for order in config.orders() {
			models.insert(order, SequenceModel::hydrate(&store, order)?);
		}
		info!(
			"generator ready: orders {:?} (sync {:?}, background {:?})",
			config.orders(),
			config.sync_orders,
			config.background_orders
		);

		Ok(Self {
			store,
			config,
			models,
			tokenizer: Box::new(WordTokenizer),
			policy: Box::new(PassThrough),
			ingested_since_compaction: 0,
		})
	}

	/// Replaces the default `WordTokenizer`.
	pub fn with_tokenizer<T: Tokenizer + 'static>(mut self, tokenizer: T) -> Self {
		self.tokenizer = Box::new(tokenizer);
		self
	}

	/// Replaces the default `PassThrough` output policy.
	pub fn with_policy<P: OutputPolicy + 'static>(mut self, policy: P) -> Self {
		self.policy = Box::new(policy);
		self
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn store(&self) -> &Arc<TransitionStore> {
		&self.store
	}

	/// Loaded orders, ascending.
	pub fn orders(&self) -> Vec<usize> {
		self.models.keys().copied().collect()
	}

	pub fn model(&self, order: usize) -> Option<&SequenceModel> {
		self.models.get(&order)
	}

	/// Learns one message on the request path.
	///
	/// # Behavior
	/// - Tokenizes `content`; no tokens means nothing is stored (`Ok(None)`).
	/// - Trains every synchronous order into a fresh accumulator.
	/// - Stores the message, its deltas and its cursor rows in one transaction.
	/// - Absorbs the deltas into the in-memory models.
	/// - Compacts every `compaction_interval` ingested messages. A failed
	///   compaction is logged and does not fail the call.
	///
	/// Returns the id of the stored message.
	pub fn ingest(&mut self, user_id: &str, channel_id: &str, content: &str) -> Result<Option<i64>> {
		let tokens = self.tokenizer.tokenize(content);
		if tokens.is_empty() {
			debug!("skipping message from {user_id}: no tokens");
			return Ok(None);
		}

		let bound = self.config.window_bound;
		let deltas: Vec<TransitionDeltas> = self
			.config
			.sync_orders
			.iter()
			.map(|order| TransitionDeltas::from_tokens(&tokens, *order, bound))
			.collect();
		let rows: Vec<TransitionRow> = deltas.iter().flat_map(TransitionDeltas::rows).collect();

		let message = NewMessage::new(user_id, channel_id, content);
		let id = self.store.ingest_message(
			&message,
			&rows,
			&self.config.sync_orders,
			&self.config.background_orders,
		)?;

		for delta in &deltas {
			if let Some(model) = self.models.get_mut(&delta.order()) {
				model.absorb(delta);
			}
		}
		debug!("ingested message {id} ({} tokens, {} rows)", tokens.len(), rows.len());

		self.after_ingest(1);
		Ok(Some(id))
	}

	/// Bulk ingestion of prepared messages.
	///
	/// Messages without tokens are dropped, as in `ingest`. Deltas for the
	/// synchronous orders are built in parallel and persisted with every
	/// message in a single transaction. Returns the number of messages
	/// stored.
	pub fn import_messages(&mut self, messages: Vec<NewMessage>) -> Result<usize> {
		let messages: Vec<NewMessage> = messages
			.into_iter()
			.filter(|message| !self.tokenizer.tokenize(&message.content).is_empty())
			.collect();
		if messages.is_empty() {
			return Ok(0);
		}

		let texts: Vec<String> = messages.iter().map(|message| message.content.clone()).collect();
		let deltas = corpus::build_deltas(
			&texts,
			self.tokenizer.as_ref(),
			&self.config.sync_orders,
			self.config.window_bound,
		)?;
		let rows: Vec<TransitionRow> = deltas.values().flat_map(TransitionDeltas::rows).collect();

		let ids = self.store.import_messages(
			&messages,
			&rows,
			&self.config.sync_orders,
			&self.config.background_orders,
		)?;

		for (order, delta) in &deltas {
			if let Some(model) = self.models.get_mut(order) {
				model.absorb(delta);
			}
		}
		info!("imported {} messages ({} rows)", ids.len(), rows.len());

		self.after_ingest(ids.len());
		Ok(ids.len())
	}

	/// One message per non-blank line, all in `channel_id`.
	pub fn import_lines(&mut self, lines: &[String], user_id: &str, channel_id: &str) -> Result<usize> {
		let messages = lines
			.iter()
			.map(|line| line.trim())
			.filter(|line| !line.is_empty())
			.map(|line| NewMessage::new(user_id, channel_id, line))
			.collect();
		self.import_messages(messages)
	}

	/// Imports a JSON file: one record or an array of records.
	///
	/// Each record's text comes from `content`, `text` or `message`, and an
	/// integer `timestamp` in Unix milliseconds is kept.
	pub fn import_json<P: AsRef<Path>>(&mut self, path: P, user_id: &str, channel_id: &str) -> Result<usize> {
		let messages = io::read_json_messages(path.as_ref(), user_id, channel_id)?;
		self.import_messages(messages)
	}

	/// Imports a CSV file with a header row.
	///
	/// Text comes from `content_column`; `user_id` and `timestamp` columns
	/// are used when present, `default_user` otherwise.
	///
	/// # Errors
	/// - `InvalidArgument` when `content_column` is missing
	pub fn import_csv<P: AsRef<Path>>(
		&mut self,
		path: P,
		channel_id: &str,
		content_column: &str,
		default_user: &str,
	) -> Result<usize> {
		let messages = io::read_csv_messages(path.as_ref(), channel_id, content_column, default_user)?;
		self.import_messages(messages)
	}

	/// Imports one file into the channel named after it.
	///
	/// `.json` and `.csv` (text in a `content` column) get their own
	/// readers, anything else is read as one message per line.
	pub fn import_file<P: AsRef<Path>>(&mut self, path: P, user_id: &str) -> Result<usize> {
		let path = path.as_ref();
		let channel_id = io::channel_name(path)?;
		match path.extension().and_then(OsStr::to_str) {
			Some("json") => self.import_json(path, user_id, &channel_id),
			Some("csv") => self.import_csv(path, &channel_id, CSV_CONTENT_COLUMN, user_id),
			_ => {
				let lines = io::read_lines(path)?;
				self.import_lines(&lines, user_id, &channel_id)
			}
		}
	}

	/// Imports every file with `extension` directly inside `folder`.
	///
	/// # Errors
	/// - `folder` is not a directory
	/// - Any file fails to read or to persist; files imported before the
	///   failure stay imported.
	pub fn import_folder<P: AsRef<Path>>(&mut self, folder: P, extension: &str, user_id: &str) -> Result<usize> {
		let mut imported = 0;
		for file in io::list_files(folder.as_ref(), extension)? {
			imported += self.import_file(&file, user_id)?;
		}
		Ok(imported)
	}

	/// Reloads one order from the store, picking up background progress.
	pub fn refresh(&mut self, order: usize) -> Result<()> {
		if !self.models.contains_key(&order) {
			return Err(MarkovError::UnknownOrder(order));
		}
		let model = SequenceModel::hydrate(&self.store, order)?;
		self.models.insert(order, model);
		Ok(())
	}

	pub fn refresh_all(&mut self) -> Result<()> {
		for order in self.orders() {
			self.refresh(order)?;
		}
		Ok(())
	}

	/// Picks the state generation starts from.
	///
	/// The last `order - 1` tokens of `context`, padded on the left with
	/// START sentinels when the context is shorter. Falls back to the
	/// all-START state when the model has never seen that state.
	pub fn select_seed_state(&self, context: &str, order: usize) -> Result<String> {
		let model = self.models.get(&order).ok_or(MarkovError::UnknownOrder(order))?;

		let width = order - 1;
		let tokens = self.tokenizer.tokenize(context);
		let tail = &tokens[tokens.len().saturating_sub(width)..];

		let mut window: Vec<&str> = std::iter::repeat_n(START_TOKEN, width - tail.len()).collect();
		window.extend(tail.iter().map(String::as_str));

		let candidate = join_state(&window);
		if model.contains_state(&candidate) {
			Ok(candidate)
		} else {
			debug!("seed state '{candidate}' unknown for order {order}, starting fresh");
			Ok(start_state(order))
		}
	}

	/// Generates text continuing `context`, with the thread-local RNG.
	pub fn generate(&self, context: &str, order: Option<usize>, params: &GenerationParams) -> Result<String> {
		self.generate_with(context, order, params, &mut rand::rng())
	}

	/// Generates text continuing `context`.
	///
	/// # Behavior
	/// - Uses `order`, or the configured generation order.
	/// - When that model produces nothing, retries with each lower loaded
	///   order in turn.
	/// - Detokenizes and runs the output policy once on the final text.
	///
	/// # Errors
	/// - `UnknownOrder` when the requested order is not loaded
	pub fn generate_with<R: Rng + ?Sized>(
		&self,
		context: &str,
		order: Option<usize>,
		params: &GenerationParams,
		rng: &mut R,
	) -> Result<String> {
		let requested = order.unwrap_or_else(|| self.config.default_generation_order());
		if !self.models.contains_key(&requested) {
			return Err(MarkovError::UnknownOrder(requested));
		}

		let mut tokens = Vec::new();
		for (order, model) in self.models.range(..=requested).rev() {
			let seed = self.select_seed_state(context, *order)?;
			tokens = model.generate(&seed, params, rng);
			if !tokens.is_empty() {
				debug!("generated {} tokens with order {order}", tokens.len());
				break;
			}
		}

		let text = self.tokenizer.detokenize(&tokens);
		Ok(self.policy.apply(&text))
	}

	/// Learns `prompt`, then answers it in live mode.
	///
	/// Training mode only learns and returns `None`.
	pub fn respond(
		&mut self,
		user_id: &str,
		channel_id: &str,
		prompt: &str,
		params: &GenerationParams,
	) -> Result<Option<String>> {
		self.ingest(user_id, channel_id, prompt)?;
		match self.config.mode {
			Mode::Training => Ok(None),
			Mode::Live => self.generate(prompt, None, params).map(Some),
		}
	}

	/// Folds the ledger into the compacted cache.
	///
	/// In-memory models are unaffected: compaction moves counts between
	/// tables without changing their sums.
	pub fn compact(&mut self) -> Result<CompactionReport> {
		let report = self.store.compact()?;
		self.ingested_since_compaction = 0;
		Ok(report)
	}

	pub fn stats(&self) -> Result<StoreStats> {
		self.store.stats()
	}

	pub fn processing_stats(&self) -> Result<BTreeMap<usize, ProcessingStats>> {
		self.store.processing_stats()
	}

	/// Runs the periodic compaction. The messages are already committed, so
	/// a failure is only logged and retried after the next ingestion.
	fn after_ingest(&mut self, count: usize) {
		let interval = self.config.compaction_interval;
		if interval == 0 {
			return;
		}
		self.ingested_since_compaction += count;
		if self.ingested_since_compaction >= interval {
			if let Err(e) = self.compact() {
				warn!("periodic compaction failed, will retry: {e}");
			}
		}
	}
}
