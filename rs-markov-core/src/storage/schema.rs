//! SQLite layout of the four persisted tables.
//!
//! - `messages`: raw corpus
//! - `transitions`: write-optimized ledger, one additive row per
//!   `(order_n, state_text, next_token)`
//! - `states`: read-optimized cache, one postcard-encoded distribution per
//!   `(order_n, state_text)`
//! - `message_processing`: per-order ingestion cursor

use rusqlite::Connection;

use crate::error::Result;

pub(crate) const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS messages (
	id INTEGER PRIMARY KEY,
	timestamp INTEGER NOT NULL,
	channel_id TEXT NOT NULL,
	user_id TEXT NOT NULL,
	content TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_user ON messages (user_id);

CREATE TABLE IF NOT EXISTS transitions (
	order_n INTEGER NOT NULL CHECK (order_n BETWEEN 2 AND 10),
	state_text TEXT NOT NULL,
	next_token TEXT NOT NULL,
	count INTEGER NOT NULL CHECK (count > 0),
	PRIMARY KEY (order_n, state_text, next_token)
);

CREATE TABLE IF NOT EXISTS states (
	order_n INTEGER NOT NULL CHECK (order_n BETWEEN 2 AND 10),
	state_text TEXT NOT NULL,
	dist_blob BLOB NOT NULL,
	total_count INTEGER NOT NULL CHECK (total_count >= 0),
	updated_at INTEGER NOT NULL,
	PRIMARY KEY (order_n, state_text)
);

CREATE TABLE IF NOT EXISTS message_processing (
	message_id INTEGER NOT NULL REFERENCES messages (id),
	order_n INTEGER NOT NULL,
	processed INTEGER NOT NULL DEFAULT 0,
	processed_at INTEGER,
	PRIMARY KEY (message_id, order_n)
);

CREATE INDEX IF NOT EXISTS idx_processing_order ON message_processing (order_n, processed);
";

/// Creates missing tables and indexes. Safe to run on every open.
pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
	conn.execute_batch(SCHEMA_SQL)?;
	Ok(())
}
