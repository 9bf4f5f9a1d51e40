use thiserror::Error;

/// Errors raised by the training, storage and generation pipeline.
///
/// Empty token lists, unknown seed states and exhausted distributions are
/// not errors: they are handled in-line by skipping, falling back or
/// stopping generation early.
#[derive(Debug, Error)]
pub enum MarkovError {
	/// SQLite failure. Any batch that hit it has been rolled back.
	#[error("database error: {0}")]
	Database(#[from] rusqlite::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// A compacted distribution blob could not be encoded or decoded.
	#[error("encoding error: {0}")]
	Encoding(#[from] postcard::Error),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("csv error: {0}")]
	Csv(#[from] csv::Error),

	#[error("config error: {0}")]
	Config(String),

	/// N-gram orders are bounded to `2..=10`.
	#[error("invalid order {0}: must be between 2 and 10")]
	InvalidOrder(usize),

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// No model is loaded for the requested order.
	#[error("unknown order {0}")]
	UnknownOrder(usize),

	/// A thread panicked while holding the store connection.
	#[error("store lock poisoned")]
	LockPoisoned,
}

pub type Result<T> = std::result::Result<T, MarkovError>;
