use std::collections::BTreeMap;

use log::{debug, info};
use rusqlite::params;

use crate::error::Result;
use super::store::{encode_distribution, read_compacted, transition_from_row, TransitionStore};
use super::types::{now_millis, CompactionReport};

impl TransitionStore {
	/// Folds the transition ledger into the compacted per-state cache.
	///
	/// For every `(order, state)` currently in the ledger the counts are added
	/// to the cached distribution (creating it if needed), `total_count` and
	/// `updated_at` are refreshed, and exactly the ledger rows that were read
	/// are deleted.
	///
	/// The whole pass is one write transaction: concurrent writers wait, and
	/// a failure leaves ledger and cache as they were. Running it on an empty
	/// ledger is a no-op.
	pub fn compact(&self) -> Result<CompactionReport> {
		let report = self.write(|tx| {
			let rows = {
				let mut stmt = tx.prepare(
					"SELECT order_n, state_text, next_token, count FROM transitions
					ORDER BY order_n, state_text, next_token",
				)?;
				let rows = stmt
					.query_map([], transition_from_row)?
					.collect::<rusqlite::Result<Vec<_>>>()?;
				rows
			};

			let mut report = CompactionReport::default();
			if rows.is_empty() {
				return Ok(report);
			}

			let mut groups: BTreeMap<(usize, String), BTreeMap<String, u64>> = BTreeMap::new();
			for row in &rows {
				*groups
					.entry((row.order, row.state.clone()))
					.or_default()
					.entry(row.next_token.clone())
					.or_insert(0) += row.count;
			}

			let now = now_millis();
			for ((order, state), folded) in &groups {
				let mut distribution = read_compacted(tx, *order, state)?
					.map(|existing| existing.distribution)
					.unwrap_or_default();
				for (next_token, count) in folded {
					*distribution.entry(next_token.clone()).or_insert(0) += count;
					report.counts_folded += count;
				}
				let total_count: u64 = distribution.values().sum();

				tx.execute(
					"INSERT INTO states (order_n, state_text, dist_blob, total_count, updated_at)
					VALUES (?1, ?2, ?3, ?4, ?5)
					ON CONFLICT (order_n, state_text) DO UPDATE
					SET dist_blob = excluded.dist_blob,
						total_count = excluded.total_count,
						updated_at = excluded.updated_at",
					params![*order as i64, state, encode_distribution(&distribution)?, total_count as i64, now],
				)?;
				report.states_touched += 1;
				debug!("compacted order {} state {:?} ({} tokens)", order, state, distribution.len());
			}

			let mut delete = tx.prepare_cached(
				"DELETE FROM transitions WHERE order_n = ?1 AND state_text = ?2 AND next_token = ?3",
			)?;
			for row in &rows {
				delete.execute(params![row.order as i64, row.state, row.next_token])?;
				report.rows_compacted += 1;
			}

			Ok(report)
		})?;

		if report.rows_compacted > 0 {
			info!(
				"compaction folded {} rows ({} counts) into {} states",
				report.rows_compacted, report.counts_folded, report.states_touched
			);
		}
		Ok(report)
	}
}
