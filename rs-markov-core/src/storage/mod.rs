//! Persistence of the corpus, the transition ledger, the compacted cache and
//! the per-order ingestion cursor.

/// Folding of the ledger into the compacted cache.
mod compaction;

/// Table definitions.
mod schema;

/// `TransitionStore`, the single shared mutable resource.
mod store;

/// Rows and reports exchanged with the store.
mod types;

pub use store::TransitionStore;
pub use types::{
	CompactedState, CompactionReport, Message, NewMessage, ProcessingStats, StoreStats, TransitionRow,
};
