use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// A stored unit of ingested text. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
	pub id: i64,
	/// Unix milliseconds.
	pub timestamp: i64,
	pub channel_id: String,
	pub user_id: String,
	pub content: String,
}

/// A message about to be stored; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewMessage {
	pub channel_id: String,
	pub user_id: String,
	pub content: String,
	/// Unix milliseconds, `None` means now.
	pub timestamp: Option<i64>,
}

impl NewMessage {
	pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>, content: impl Into<String>) -> Self {
		Self {
			channel_id: channel_id.into(),
			user_id: user_id.into(),
			content: content.into(),
			timestamp: None,
		}
	}
}

/// One `(order, state, next_token) -> count` ledger entry.
///
/// When passed to a batch merge, `count` is a delta added to the stored
/// value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionRow {
	pub order: usize,
	pub state: String,
	pub next_token: String,
	pub count: u64,
}

/// Read-optimized per-state distribution folded out of the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactedState {
	pub order: usize,
	pub state: String,
	pub distribution: BTreeMap<String, u64>,
	/// Always equal to the sum of `distribution`.
	pub total_count: u64,
	/// Unix milliseconds.
	pub updated_at: i64,
}

/// Cursor progress for one order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
	pub total: u64,
	pub processed: u64,
	pub pending: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
	pub message_count: u64,
	/// Rows currently in the ledger (not yet compacted).
	pub transition_count: u64,
	/// Rows in the compacted cache.
	pub state_count: u64,
	/// Sum of counts currently in the ledger.
	pub total_transitions: u64,
}

/// Outcome of one compaction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
	/// Ledger rows folded and deleted.
	pub rows_compacted: u64,
	/// Distinct `(order, state)` cache entries created or updated.
	pub states_touched: u64,
	/// Sum of the counts moved from the ledger to the cache.
	pub counts_folded: u64,
}

pub(crate) fn now_millis() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or_default()
}
