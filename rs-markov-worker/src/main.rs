use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use log::info;

use rs_markov_core::{BackgroundProcessor, Config, TransitionStore};

/// Entry point of the background processor.
///
/// Trains the background orders from the messages stored by the server,
/// sharing the same SQLite file.
///
/// # Notes
/// - Configuration comes from the environment, like the server.
/// - `MARKOV_WORKER_ONCE=1` drains the pending messages and exits.
/// - Otherwise it processes one batch per order, sleeps, and repeats. No
///   signal handler sets the stop flag, so the process only ends when it is
///   killed.
/// - Safe to kill at any point: progress is committed per batch.
fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::init();

	let config = Config::from_env()?;
	if config.background_orders.is_empty() {
		info!("no background orders configured, nothing to do");
		return Ok(());
	}

	let store = Arc::new(TransitionStore::open(&config.db_path)?);
	let processor = BackgroundProcessor::from_config(store, &config)?;

	let once = std::env::var("MARKOV_WORKER_ONCE").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
	if once {
		let processed = processor.drain()?;
		for (order, count) in processed {
			info!("order {order}: processed {count} messages");
		}
		return Ok(());
	}

	// Never set, see above
	let stop = AtomicBool::new(false);
	processor.run(&stop);
	Ok(())
}
