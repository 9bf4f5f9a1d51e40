use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MarkovError, Result};
use crate::model::deltas::WindowBound;
use crate::model::generation_params::GenerationParams;
use crate::model::sequence_model::validate_order;

/// Whether the request path only learns, or also answers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	#[default]
	Training,
	Live,
}

impl FromStr for Mode {
	type Err = MarkovError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"training" => Ok(Mode::Training),
			"live" => Ok(Mode::Live),
			other => Err(MarkovError::Config(format!("unknown mode '{other}'"))),
		}
	}
}

impl FromStr for WindowBound {
	type Err = MarkovError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"include-end" => Ok(WindowBound::IncludeEnd),
			"legacy" => Ok(WindowBound::Legacy),
			other => Err(MarkovError::Config(format!("unknown window bound '{other}'"))),
		}
	}
}

/// Settings consumed by the core, the server and the worker.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub db_path: String,
	pub mode: Mode,
	pub port: u16,
	/// Orders trained on the request path.
	pub sync_orders: Vec<usize>,
	/// Orders trained by the background processor.
	pub background_orders: Vec<usize>,
	/// Order used by generation when the caller does not pick one.
	/// `None` means the highest synchronous order.
	pub generation_order: Option<usize>,
	pub batch_size: usize,
	pub poll_interval_secs: u64,
	/// Ingested messages between two compactions, 0 disables it.
	pub compaction_interval: usize,
	pub max_tokens: usize,
	pub temperature: f32,
	pub top_k: Option<usize>,
	pub recommended_length: Option<usize>,
	pub window_bound: WindowBound,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			db_path: "rs_markov.db".to_owned(),
			mode: Mode::Training,
			port: 11434,
			sync_orders: vec![2],
			background_orders: vec![3, 4],
			generation_order: None,
			batch_size: 10,
			poll_interval_secs: 10,
			compaction_interval: 1000,
			max_tokens: 500,
			temperature: 0.8,
			top_k: None,
			recommended_length: None,
			window_bound: WindowBound::IncludeEnd,
		}
	}
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
	raw.trim()
		.parse()
		.map_err(|_| MarkovError::Config(format!("invalid value for {key}: '{raw}'")))
}

fn parse_orders(key: &str, raw: &str) -> Result<Vec<usize>> {
	raw.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(|s| parse_value(key, s))
		.collect()
}

impl Config {
	/// Loads a JSON config file; missing keys keep their defaults.
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let contents = fs::read_to_string(path)?;
		let config: Self = serde_json::from_str(&contents)?;
		config.validate()?;
		Ok(config)
	}

	/// Loads the config from environment variables.
	pub fn from_env() -> Result<Self> {
		Self::from_vars(|key| std::env::var(key).ok())
	}

	/// Builds a config from a variable lookup, starting from the defaults.
	///
	/// Recognized keys: `DB_PATH`, `MODE`, `MARKOV_PORT`,
	/// `MARKOV_SYNC_ORDERS`, `MARKOV_BACKGROUND_ORDERS`,
	/// `MARKOV_GENERATION_ORDER`, `MARKOV_BATCH_SIZE`, `MARKOV_POLL_INTERVAL`,
	/// `COMPACTION_INTERVAL`, `MAX_TOKENS`, `TEMPERATURE`, `TOP_K`,
	/// `RECOMMENDED_LENGTH`, `MARKOV_WINDOW_BOUND`.
	pub fn from_vars<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();

		if let Some(v) = lookup("DB_PATH") {
			config.db_path = v;
		}
		if let Some(v) = lookup("MODE") {
			config.mode = v.parse()?;
		}
		if let Some(v) = lookup("MARKOV_PORT") {
			config.port = parse_value("MARKOV_PORT", &v)?;
		}
		if let Some(v) = lookup("MARKOV_SYNC_ORDERS") {
			config.sync_orders = parse_orders("MARKOV_SYNC_ORDERS", &v)?;
		}
		if let Some(v) = lookup("MARKOV_BACKGROUND_ORDERS") {
			config.background_orders = parse_orders("MARKOV_BACKGROUND_ORDERS", &v)?;
		}
		if let Some(v) = lookup("MARKOV_GENERATION_ORDER") {
			config.generation_order = Some(parse_value("MARKOV_GENERATION_ORDER", &v)?);
		}
		if let Some(v) = lookup("MARKOV_BATCH_SIZE") {
			config.batch_size = parse_value("MARKOV_BATCH_SIZE", &v)?;
		}
		if let Some(v) = lookup("MARKOV_POLL_INTERVAL") {
			config.poll_interval_secs = parse_value("MARKOV_POLL_INTERVAL", &v)?;
		}
		if let Some(v) = lookup("COMPACTION_INTERVAL") {
			config.compaction_interval = parse_value("COMPACTION_INTERVAL", &v)?;
		}
		if let Some(v) = lookup("MAX_TOKENS") {
			config.max_tokens = parse_value("MAX_TOKENS", &v)?;
		}
		if let Some(v) = lookup("TEMPERATURE") {
			config.temperature = parse_value("TEMPERATURE", &v)?;
		}
		if let Some(v) = lookup("TOP_K") {
			config.top_k = Some(parse_value("TOP_K", &v)?);
		}
		if let Some(v) = lookup("RECOMMENDED_LENGTH") {
			config.recommended_length = Some(parse_value("RECOMMENDED_LENGTH", &v)?);
		}
		if let Some(v) = lookup("MARKOV_WINDOW_BOUND") {
			config.window_bound = v.parse()?;
		}

		config.validate()?;
		Ok(config)
	}

	/// Checks orders, batch size and generation defaults.
	///
	/// # Errors
	/// - an order outside `2..=10`
	/// - no order at all, an order both synchronous and background, or an
	///   order listed twice
	/// - `batch_size == 0`
	/// - a `generation_order` that is not configured
	/// - invalid generation defaults
	pub fn validate(&self) -> Result<()> {
		if self.sync_orders.is_empty() && self.background_orders.is_empty() {
			return Err(MarkovError::Config("at least one order is required".to_owned()));
		}
		for order in self.sync_orders.iter().chain(&self.background_orders) {
			validate_order(*order)?;
		}
		if let Some(order) = self.sync_orders.iter().find(|o| self.background_orders.contains(o)) {
			return Err(MarkovError::Config(format!(
				"order {order} cannot be both synchronous and background"
			)));
		}
		if self.orders().len() != self.sync_orders.len() + self.background_orders.len() {
			return Err(MarkovError::Config("orders must not be listed twice".to_owned()));
		}
		if self.batch_size == 0 {
			return Err(MarkovError::Config("batch_size must be at least 1".to_owned()));
		}
		if let Some(order) = self.generation_order {
			if !self.orders().contains(&order) {
				return Err(MarkovError::Config(format!(
					"generation_order {order} is not a configured order"
				)));
			}
		}
		self.generation_params()?;
		Ok(())
	}

	/// Every configured order, ascending and deduplicated.
	pub fn orders(&self) -> Vec<usize> {
		let mut orders: Vec<usize> = self.sync_orders.iter().chain(&self.background_orders).copied().collect();
		orders.sort_unstable();
		orders.dedup();
		orders
	}

	/// Order used when generation does not name one.
	pub fn default_generation_order(&self) -> usize {
		self.generation_order
			.or_else(|| self.sync_orders.iter().max().copied())
			.or_else(|| self.background_orders.iter().max().copied())
			.unwrap_or(crate::model::sequence_model::MIN_ORDER)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}

	/// Generation defaults, validated.
	pub fn generation_params(&self) -> Result<GenerationParams> {
		let mut params = GenerationParams::new(self.max_tokens, self.temperature)?;
		params.set_top_k(self.top_k)?;
		params.set_recommended_length(self.recommended_length)?;
		Ok(params)
	}
}
