use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::error::{MarkovError, Result};
use super::schema::init_schema;
use super::types::{
	now_millis, CompactedState, Message, NewMessage, ProcessingStats, StoreStats, TransitionRow,
};

/// How long a writer waits for another process holding the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MERGE_TRANSITION_SQL: &str = "
	INSERT INTO transitions (order_n, state_text, next_token, count)
	VALUES (?1, ?2, ?3, ?4)
	ON CONFLICT (order_n, state_text, next_token) DO UPDATE SET count = count + excluded.count";

const MARK_PROCESSED_SQL: &str = "
	INSERT INTO message_processing (message_id, order_n, processed, processed_at)
	VALUES (?1, ?2, 1, ?3)
	ON CONFLICT (message_id, order_n) DO UPDATE
	SET processed = 1, processed_at = excluded.processed_at
	WHERE message_processing.processed = 0";

const ATTACH_PENDING_SQL: &str = "
	INSERT OR IGNORE INTO message_processing (message_id, order_n, processed)
	VALUES (?1, ?2, 0)";

/// Durable, additive ledger of transition counts, with its corpus,
/// compacted cache and ingestion cursor.
///
/// Backed by SQLite. A handle serializes its own callers through a mutex;
/// several handles (or processes) may share one database file, in which case
/// WAL journaling and a busy timeout let the request path and the background
/// processor write concurrently. Every mutation runs in a single `IMMEDIATE`
/// transaction, so a partially-applied batch is never observable.
#[derive(Debug)]
pub struct TransitionStore {
	conn: Mutex<Connection>,
}

impl TransitionStore {
	/// Opens (or creates) a database file.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
		let conn = Connection::open(path.as_ref())?;
		let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
		debug!("opened {} (journal_mode={})", path.as_ref().display(), mode);
		Self::init(conn)
	}

	/// Opens a private in-memory database.
	pub fn open_in_memory() -> Result<Self> {
		Self::init(Connection::open_in_memory()?)
	}

	fn init(conn: Connection) -> Result<Self> {
		conn.busy_timeout(BUSY_TIMEOUT)?;
		conn.pragma_update(None, "foreign_keys", true)?;
		init_schema(&conn)?;
		Ok(Self { conn: Mutex::new(conn) })
	}

	fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
		self.conn.lock().map_err(|_| MarkovError::LockPoisoned)
	}

	/// Runs `f` inside one write transaction, committing only if it succeeds.
	pub(crate) fn write<T, F>(&self, f: F) -> Result<T>
	where
		F: FnOnce(&Transaction<'_>) -> Result<T>,
	{
		let mut conn = self.lock()?;
		let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
		let value = f(&tx)?;
		tx.commit()?;
		Ok(value)
	}

	fn read<T, F>(&self, f: F) -> Result<T>
	where
		F: FnOnce(&Connection) -> Result<T>,
	{
		let conn = self.lock()?;
		f(&conn)
	}

	/// Stores a message and attaches an unprocessed cursor row for every
	/// order in `pending_orders`.
	pub fn add_message(&self, message: &NewMessage, pending_orders: &[usize]) -> Result<i64> {
		self.write(|tx| {
			let id = insert_message(tx, message)?;
			attach_pending(tx, id, pending_orders)?;
			Ok(id)
		})
	}

	/// Merges a batch of deltas: inserts absent keys, adds to present ones.
	///
	/// Atomic: on any failure nothing from the batch is kept. The store does
	/// no deduplication, so callers must only pass new observations.
	pub fn apply_batch(&self, rows: &[TransitionRow]) -> Result<()> {
		if rows.is_empty() {
			return Ok(());
		}
		self.write(|tx| merge_rows(tx, rows))?;
		debug!("merged {} transition rows", rows.len());
		Ok(())
	}

	/// Merges `rows` and marks `message_ids` processed for `order` in one
	/// transaction.
	///
	/// A crash can no longer leave counts persisted for messages that are
	/// still pending, so a restarted processor never counts a batch twice.
	pub fn commit_batch(&self, rows: &[TransitionRow], order: usize, message_ids: &[i64]) -> Result<()> {
		self.write(|tx| {
			merge_rows(tx, rows)?;
			let now = now_millis();
			for id in message_ids {
				mark_processed(tx, *id, order, now)?;
			}
			Ok(())
		})
	}

	/// Request-path ingestion in one transaction: stores the message, merges
	/// what the synchronous orders learned from it, marks those orders
	/// processed and attaches the background orders as pending.
	pub fn ingest_message(
		&self,
		message: &NewMessage,
		rows: &[TransitionRow],
		trained_orders: &[usize],
		pending_orders: &[usize],
	) -> Result<i64> {
		self.write(|tx| {
			let id = insert_message(tx, message)?;
			merge_rows(tx, rows)?;
			let now = now_millis();
			for order in trained_orders {
				mark_processed(tx, id, *order, now)?;
			}
			attach_pending(tx, id, pending_orders)?;
			Ok(id)
		})
	}

	/// Bulk variant of `ingest_message`: `rows` hold the deltas of every
	/// message in `messages` for every order in `trained_orders`.
	pub fn import_messages(
		&self,
		messages: &[NewMessage],
		rows: &[TransitionRow],
		trained_orders: &[usize],
		pending_orders: &[usize],
	) -> Result<Vec<i64>> {
		self.write(|tx| {
			let now = now_millis();
			let mut ids = Vec::with_capacity(messages.len());
			for message in messages {
				let id = insert_message(tx, message)?;
				for order in trained_orders {
					mark_processed(tx, id, *order, now)?;
				}
				attach_pending(tx, id, pending_orders)?;
				ids.push(id);
			}
			merge_rows(tx, rows)?;
			Ok(ids)
		})
	}

	/// Every ledger row of an order, for cold-start hydration.
	pub fn load_all(&self, order: usize) -> Result<Vec<TransitionRow>> {
		self.read(|conn| {
			let mut stmt = conn.prepare(
				"SELECT order_n, state_text, next_token, count FROM transitions
				WHERE order_n = ?1 ORDER BY state_text, next_token",
			)?;
			let rows = stmt
				.query_map(params![order as i64], transition_from_row)?
				.collect::<rusqlite::Result<Vec<_>>>()?;
			Ok(rows)
		})
	}

	/// Every compacted state of an order.
	pub fn load_compacted(&self, order: usize) -> Result<Vec<CompactedState>> {
		self.read(|conn| {
			let mut stmt = conn.prepare(
				"SELECT order_n, state_text, dist_blob, total_count, updated_at FROM states
				WHERE order_n = ?1 ORDER BY state_text",
			)?;
			let raw = stmt
				.query_map(params![order as i64], raw_compacted_from_row)?
				.collect::<rusqlite::Result<Vec<_>>>()?;
			raw.into_iter().map(RawCompacted::decode).collect()
		})
	}

	pub fn get_compacted_state(&self, order: usize, state: &str) -> Result<Option<CompactedState>> {
		self.read(|conn| read_compacted(conn, order, state))
	}

	/// Ledger rows (not yet compacted) leaving `state`.
	pub fn get_all_for_state(&self, order: usize, state: &str) -> Result<Vec<TransitionRow>> {
		self.read(|conn| {
			let mut stmt = conn.prepare(
				"SELECT order_n, state_text, next_token, count FROM transitions
				WHERE order_n = ?1 AND state_text = ?2 ORDER BY next_token",
			)?;
			let rows = stmt
				.query_map(params![order as i64, state], transition_from_row)?
				.collect::<rusqlite::Result<Vec<_>>>()?;
			Ok(rows)
		})
	}

	/// Raw counts leaving `state`: ledger rows and compacted cache summed.
	pub fn distribution(&self, order: usize, state: &str) -> Result<BTreeMap<String, u64>> {
		let mut counts = self
			.get_compacted_state(order, state)?
			.map(|compacted| compacted.distribution)
			.unwrap_or_default();
		for row in self.get_all_for_state(order, state)? {
			*counts.entry(row.next_token).or_insert(0) += row.count;
		}
		Ok(counts)
	}

	/// Up to `limit` messages not yet processed for `order`, oldest first.
	///
	/// A message counts as unprocessed when it has no cursor row for the
	/// order, or an unprocessed one.
	pub fn get_unprocessed(&self, order: usize, limit: usize) -> Result<Vec<Message>> {
		self.read(|conn| {
			let mut stmt = conn.prepare(
				"SELECT m.id, m.timestamp, m.channel_id, m.user_id, m.content
				FROM messages m
				LEFT JOIN message_processing mp ON m.id = mp.message_id AND mp.order_n = ?1
				WHERE mp.processed IS NULL OR mp.processed = 0
				ORDER BY m.id
				LIMIT ?2",
			)?;
			let messages = stmt
				.query_map(params![order as i64, limit as i64], message_from_row)?
				.collect::<rusqlite::Result<Vec<_>>>()?;
			Ok(messages)
		})
	}

	/// Marks a message processed for `order`. Idempotent; never unsets.
	pub fn mark_processed(&self, message_id: i64, order: usize) -> Result<()> {
		self.write(|tx| mark_processed(tx, message_id, order, now_millis()))
	}

	/// Cursor progress for every order attached to at least one message.
	pub fn processing_stats(&self) -> Result<BTreeMap<usize, ProcessingStats>> {
		self.read(|conn| {
			let total: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
			let mut stmt = conn.prepare(
				"SELECT mp.order_n, COALESCE(SUM(CASE WHEN mp.processed = 1 THEN 1 ELSE 0 END), 0)
				FROM message_processing mp
				JOIN messages m ON m.id = mp.message_id
				GROUP BY mp.order_n
				ORDER BY mp.order_n",
			)?;
			let per_order = stmt
				.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
				.collect::<rusqlite::Result<Vec<_>>>()?;

			let total = total as u64;
			Ok(per_order
				.into_iter()
				.map(|(order, processed)| {
					let processed = processed as u64;
					let stats = ProcessingStats {
						total,
						processed,
						pending: total.saturating_sub(processed),
					};
					(order as usize, stats)
				})
				.collect())
		})
	}

	pub fn stats(&self) -> Result<StoreStats> {
		self.read(|conn| {
			let count = |sql: &str| -> Result<u64> {
				let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
				Ok(value as u64)
			};
			Ok(StoreStats {
				message_count: count("SELECT COUNT(*) FROM messages")?,
				transition_count: count("SELECT COUNT(*) FROM transitions")?,
				state_count: count("SELECT COUNT(*) FROM states")?,
				total_transitions: count("SELECT COALESCE(SUM(count), 0) FROM transitions")?,
			})
		})
	}

	/// Stored messages by ascending id, with optional pagination.
	pub fn get_messages(&self, limit: Option<usize>, offset: usize) -> Result<Vec<Message>> {
		self.read(|conn| {
			let mut stmt = conn.prepare(
				"SELECT id, timestamp, channel_id, user_id, content FROM messages
				ORDER BY id LIMIT ?1 OFFSET ?2",
			)?;
			// SQLite treats a negative limit as unbounded.
			let limit = limit.map_or(-1, |l| l as i64);
			let messages = stmt
				.query_map(params![limit, offset as i64], message_from_row)?
				.collect::<rusqlite::Result<Vec<_>>>()?;
			Ok(messages)
		})
	}

	/// Deletes every message of a user and their cursor rows.
	///
	/// Counts already learned from those messages stay in the ledger and cache.
	pub fn delete_user_data(&self, user_id: &str) -> Result<usize> {
		let deleted = self.write(|tx| {
			tx.execute(
				"DELETE FROM message_processing
				WHERE message_id IN (SELECT id FROM messages WHERE user_id = ?1)",
				params![user_id],
			)?;
			Ok(tx.execute("DELETE FROM messages WHERE user_id = ?1", params![user_id])?)
		})?;
		info!("deleted {} messages of user {}", deleted, user_id);
		Ok(deleted)
	}

	/// Drops the ledger, cache and cursor rows of one order.
	///
	/// Every message becomes unprocessed for that order again, so the
	/// background processor rebuilds it from the corpus.
	pub fn clear_order(&self, order: usize) -> Result<()> {
		self.write(|tx| {
			let order = order as i64;
			tx.execute("DELETE FROM transitions WHERE order_n = ?1", params![order])?;
			tx.execute("DELETE FROM states WHERE order_n = ?1", params![order])?;
			tx.execute("DELETE FROM message_processing WHERE order_n = ?1", params![order])?;
			Ok(())
		})?;
		info!("cleared order {}", order);
		Ok(())
	}

	/// Deletes all messages, transitions, compacted states and cursor rows.
	pub fn clear_training_data(&self) -> Result<()> {
		self.write(|tx| {
			tx.execute_batch(
				"DELETE FROM message_processing;
				DELETE FROM transitions;
				DELETE FROM states;
				DELETE FROM messages;",
			)?;
			Ok(())
		})
	}
}

fn insert_message(tx: &Transaction<'_>, message: &NewMessage) -> Result<i64> {
	tx.execute(
		"INSERT INTO messages (timestamp, channel_id, user_id, content) VALUES (?1, ?2, ?3, ?4)",
		params![
			message.timestamp.unwrap_or_else(now_millis),
			message.channel_id,
			message.user_id,
			message.content
		],
	)?;
	Ok(tx.last_insert_rowid())
}

fn attach_pending(tx: &Transaction<'_>, message_id: i64, orders: &[usize]) -> Result<()> {
	let mut stmt = tx.prepare_cached(ATTACH_PENDING_SQL)?;
	for order in orders {
		stmt.execute(params![message_id, *order as i64])?;
	}
	Ok(())
}

fn mark_processed(tx: &Transaction<'_>, message_id: i64, order: usize, now: i64) -> Result<()> {
	tx.prepare_cached(MARK_PROCESSED_SQL)?
		.execute(params![message_id, order as i64, now])?;
	Ok(())
}

fn merge_rows(tx: &Transaction<'_>, rows: &[TransitionRow]) -> Result<()> {
	let mut stmt = tx.prepare_cached(MERGE_TRANSITION_SQL)?;
	for row in rows {
		if row.count == 0 {
			continue;
		}
		stmt.execute(params![row.order as i64, row.state, row.next_token, row.count as i64])?;
	}
	Ok(())
}

pub(crate) fn transition_from_row(row: &Row<'_>) -> rusqlite::Result<TransitionRow> {
	Ok(TransitionRow {
		order: row.get::<_, i64>(0)? as usize,
		state: row.get(1)?,
		next_token: row.get(2)?,
		count: row.get::<_, i64>(3)? as u64,
	})
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
	Ok(Message {
		id: row.get(0)?,
		timestamp: row.get(1)?,
		channel_id: row.get(2)?,
		user_id: row.get(3)?,
		content: row.get(4)?,
	})
}

/// A `states` row whose blob has not been decoded yet.
struct RawCompacted {
	order: usize,
	state: String,
	blob: Vec<u8>,
	total_count: u64,
	updated_at: i64,
}

impl RawCompacted {
	fn decode(self) -> Result<CompactedState> {
		Ok(CompactedState {
			order: self.order,
			state: self.state,
			distribution: decode_distribution(&self.blob)?,
			total_count: self.total_count,
			updated_at: self.updated_at,
		})
	}
}

fn raw_compacted_from_row(row: &Row<'_>) -> rusqlite::Result<RawCompacted> {
	Ok(RawCompacted {
		order: row.get::<_, i64>(0)? as usize,
		state: row.get(1)?,
		blob: row.get(2)?,
		total_count: row.get::<_, i64>(3)? as u64,
		updated_at: row.get(4)?,
	})
}

pub(crate) fn read_compacted(conn: &Connection, order: usize, state: &str) -> Result<Option<CompactedState>> {
	let raw = conn
		.query_row(
			"SELECT order_n, state_text, dist_blob, total_count, updated_at FROM states
			WHERE order_n = ?1 AND state_text = ?2",
			params![order as i64, state],
			raw_compacted_from_row,
		)
		.optional()?;
	raw.map(RawCompacted::decode).transpose()
}

pub(crate) fn encode_distribution(distribution: &BTreeMap<String, u64>) -> Result<Vec<u8>> {
	Ok(postcard::to_stdvec(distribution)?)
}

fn decode_distribution(blob: &[u8]) -> Result<BTreeMap<String, u64>> {
	Ok(postcard::from_bytes(blob)?)
}
