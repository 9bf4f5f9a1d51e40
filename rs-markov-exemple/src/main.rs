use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rs_markov_core::{BackgroundProcessor, Config, GenerationParams, Generator, TransitionStore};

const FALLBACK_CORPUS: [&str; 6] = [
    "The cat sat on the mat.",
    "The cat ate the fish, then the cat slept.",
    "A dog sat on the mat too.",
    "The dog chased the cat around the house.",
    "Don't wake the cat, it's sleeping.",
    "The fish swam away from the cat.",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Order 2 is trained while ingesting, 3 and 4 by the background processor
    let config = Config {
        sync_orders: vec![2],
        background_orders: vec![3, 4],
        generation_order: Some(4),
        compaction_interval: 0,
        ..Config::default()
    };

    // Everything lives in memory for the walkthrough
    let store = Arc::new(TransitionStore::open_in_memory()?);
    let mut app = Generator::new(store.clone(), config.clone())?;

    // Import every .txt file of "data" (one message per line),
    // or a tiny built-in corpus when there is none
    let imported = match app.import_folder("./data", "txt", "exemple") {
        Ok(n) if n > 0 => n,
        _ => {
            let lines: Vec<String> = FALLBACK_CORPUS.iter().map(|s| s.to_string()).collect();
            app.import_lines(&lines, "exemple", "builtin")?
        }
    };
    println!("Imported {imported} messages");

    // Messages can also be learned one by one
    app.ingest("exemple", "live", "The cat sat near the dog.")?;

    // Orders 3 and 4 are still pending: drain them in the background processor
    let processor = BackgroundProcessor::from_config(store.clone(), &config)?;
    for (order, count) in processor.drain()? {
        println!("Order {order}: {count} messages processed in background");
    }

    // Load the background progress, then fold the ledger into the cache
    app.refresh_all()?;
    let report = app.compact()?;
    println!(
        "Compacted {} rows into {} states ({} counts)",
        report.rows_compacted, report.states_touched, report.counts_folded
    );

    // A seeded RNG makes the output reproducible
    let mut rng = StdRng::seed_from_u64(42);
    let mut params = GenerationParams::new(30, 1.0)?;
    params.set_recommended_length(Some(8))?;

    for temperature in [0.0, 0.5, 1.0, 1.5] {
        params.set_temperature(temperature)?;
        let text = app.generate_with("the cat", None, &params, &mut rng)?;
        println!("T={temperature}: {text}");
    }

    // Top-k keeps only the k most likely tokens
    params.set_temperature(1.0)?;
    params.set_top_k(Some(2))?;
    for i in 0..3 {
        println!("Top-2 sentence {}: {}", i + 1, app.generate_with("", Some(2), &params, &mut rng)?);
    }

    // Invalid parameters are rejected
    match params.set_top_k(Some(0)) {
        Ok(_) => println!("Should not happen"),
        Err(e) => println!("Top-k 0 is invalid: {e}"),
    }

    let stats = app.stats()?;
    println!(
        "{} messages, {} ledger rows, {} cached states, {} transitions",
        stats.message_count, stats.transition_count, stats.state_count, stats.total_transitions
    );
    for (order, progress) in app.processing_stats()? {
        println!("Order {order}: {}/{} processed", progress.processed, progress.total);
    }

    Ok(())
}
