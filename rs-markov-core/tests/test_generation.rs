use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;

use rs_markov_core::policy::OutputPolicy;
use rs_markov_core::{Config, GenerationParams, Generator, MarkovError, Mode, TransitionStore};

fn config(sync_orders: Vec<usize>, background_orders: Vec<usize>) -> Config {
	Config {
		sync_orders,
		background_orders,
		compaction_interval: 0,
		..Config::default()
	}
}

fn generator(config: Config) -> Generator {
	let store = Arc::new(TransitionStore::open_in_memory().unwrap());
	Generator::new(store, config).unwrap()
}

/// Upper-cases the output and counts its calls.
struct ShoutingPolicy {
	calls: Arc<AtomicUsize>,
}

impl OutputPolicy for ShoutingPolicy {
	fn apply(&self, text: &str) -> String {
		self.calls.fetch_add(1, Ordering::SeqCst);
		text.to_uppercase()
	}
}

#[test]
fn test_ingest_stores_and_learns() {
	let mut app = generator(config(vec![2], vec![3]));

	let id = app.ingest("alice", "general", "The cat sat.").unwrap();
	assert!(id.is_some());
	assert_eq!(app.model(2).unwrap().count("cat", "sat"), 1);
	assert_eq!(app.model(2).unwrap().count("sat", "."), 1);

	let messages = app.store().get_messages(None, 0).unwrap();
	assert_eq!(messages.len(), 1);
	assert_eq!(messages[0].user_id, "alice");
	assert_eq!(messages[0].content, "The cat sat.");
}

#[test]
fn test_ingest_without_tokens_is_skipped() {
	let mut app = generator(config(vec![2], vec![]));
	assert_eq!(app.ingest("alice", "general", "   ").unwrap(), None);
	assert_eq!(app.stats().unwrap().message_count, 0);
}

#[test]
fn test_invalid_config_is_rejected() {
	let store = Arc::new(TransitionStore::open_in_memory().unwrap());
	let result = Generator::new(store, config(vec![1], vec![]));
	assert!(matches!(result, Err(MarkovError::InvalidOrder(1))));
}

#[test]
fn test_seed_state_selection() {
	let mut app = generator(config(vec![2, 3], vec![]));
	app.ingest("u", "c", "the cat sat").unwrap();

	assert_eq!(app.select_seed_state("look at the cat", 2).unwrap(), "cat");
	assert_eq!(app.select_seed_state("the cat", 3).unwrap(), "the cat");
	// Short context is padded with START sentinels
	assert_eq!(app.select_seed_state("the", 3).unwrap(), "<START> the");
	// Unknown windows fall back to the start state
	assert_eq!(app.select_seed_state("zebra", 2).unwrap(), "<START>");
	assert_eq!(app.select_seed_state("cat", 3).unwrap(), "<START> <START>");
	assert_eq!(app.select_seed_state("", 3).unwrap(), "<START> <START>");

	assert!(matches!(app.select_seed_state("the", 4), Err(MarkovError::UnknownOrder(4))));
}

#[test]
fn test_greedy_generation() {
	let mut app = generator(config(vec![2], vec![]));
	app.ingest("u", "c", "the cat sat on the mat").unwrap();

	let params = GenerationParams::new(6, 0.0).unwrap();
	let mut rng = StdRng::seed_from_u64(1);
	// "the" is followed by "cat" and "mat" once each, the tie goes to "cat"
	assert_eq!(app.generate_with("", None, &params, &mut rng).unwrap(), "the cat sat on the cat");
	assert_eq!(app.generate_with("on", Some(2), &params, &mut rng).unwrap(), "the cat sat on the cat");
}

#[test]
fn test_generation_detokenizes_punctuation() {
	let mut app = generator(config(vec![2], vec![]));
	app.ingest("u", "c", "Hello, world!").unwrap();

	let params = GenerationParams::new(20, 0.0).unwrap();
	assert_eq!(app.generate("", None, &params).unwrap(), "Hello, world!");
}

#[test]
fn test_empty_model_generates_nothing() {
	let app = generator(config(vec![2], vec![]));
	let params = GenerationParams::default();
	assert_eq!(app.generate("anything", None, &params).unwrap(), "");
}

#[test]
fn test_unknown_order() {
	let app = generator(config(vec![2], vec![3]));
	let params = GenerationParams::default();
	assert!(matches!(app.generate("", Some(5), &params), Err(MarkovError::UnknownOrder(5))));
}

#[test]
fn test_backoff_to_lower_order() {
	let mut app = generator(config(vec![2], vec![3]));
	app.ingest("u", "c", "the cat sat on the mat").unwrap();

	// Order 3 is pending in the background and still empty
	assert_eq!(app.model(3).unwrap().state_count(), 0);

	let params = GenerationParams::new(6, 0.0).unwrap();
	let mut rng = StdRng::seed_from_u64(1);
	assert_eq!(app.generate_with("", Some(3), &params, &mut rng).unwrap(), "the cat sat on the cat");
}

#[test]
fn test_policy_applied_once() {
	let calls = Arc::new(AtomicUsize::new(0));
	let mut app = generator(config(vec![2], vec![3])).with_policy(ShoutingPolicy { calls: calls.clone() });
	app.ingest("u", "c", "the cat sat").unwrap();

	let params = GenerationParams::new(10, 0.0).unwrap();
	let text = app.generate("", Some(3), &params).unwrap();
	assert_eq!(text, "THE CAT SAT");
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_respond_in_training_mode() {
	let mut app = generator(config(vec![2], vec![]));
	let params = GenerationParams::default();

	assert_eq!(app.respond("u", "c", "the cat sat", &params).unwrap(), None);
	assert_eq!(app.stats().unwrap().message_count, 1);
}

#[test]
fn test_respond_in_live_mode() {
	let mut app = generator(Config {
		mode: Mode::Live,
		..config(vec![2], vec![])
	});
	app.ingest("u", "c", "the cat sat on the mat").unwrap();

	let params = GenerationParams::new(10, 1.0).unwrap();
	let reply = app.respond("u", "c", "look at the dog", &params).unwrap();
	assert!(reply.is_some());
	assert_eq!(app.stats().unwrap().message_count, 2);
}

#[test]
fn test_periodic_compaction() {
	let mut app = generator(Config {
		compaction_interval: 2,
		..config(vec![2], vec![])
	});

	app.ingest("u", "c", "the cat sat").unwrap();
	assert!(app.stats().unwrap().transition_count > 0);

	app.ingest("u", "c", "the dog sat").unwrap();
	let stats = app.stats().unwrap();
	assert_eq!(stats.transition_count, 0);
	assert!(stats.state_count > 0);
	assert_eq!(app.model(2).unwrap().count("<START>", "the"), 2);

	// Counts survive a reload from the cache
	app.refresh_all().unwrap();
	assert_eq!(app.model(2).unwrap().count("<START>", "the"), 2);
}

#[test]
fn test_import_matches_sequential_ingest() {
	let lines: Vec<String> = (0..300)
		.map(|i| format!("line {} the quick brown fox, number {}", i % 13, i % 7))
		.collect();

	let mut imported = generator(config(vec![2, 3], vec![4]));
	assert_eq!(imported.import_lines(&lines, "u", "c").unwrap(), 300);

	let mut sequential = generator(config(vec![2, 3], vec![4]));
	for line in &lines {
		sequential.ingest("u", "c", line).unwrap();
	}

	for order in [2, 3] {
		assert_eq!(
			imported.store().load_all(order).unwrap(),
			sequential.store().load_all(order).unwrap()
		);
	}
	assert_eq!(
		imported.model(3).unwrap().distribution("the quick"),
		sequential.model(3).unwrap().distribution("the quick")
	);

	let stats = imported.processing_stats().unwrap();
	assert_eq!(stats[&4].pending, 300);
	assert_eq!(stats[&2].pending, 0);
}

#[test]
fn test_import_skips_lines_without_tokens() {
	let mut app = generator(config(vec![2], vec![3]));
	let lines = vec![
		"one line".to_owned(),
		"   ".to_owned(),
		String::new(),
		"@@@ ###".to_owned(),
		"two lines".to_owned(),
	];
	assert_eq!(app.import_lines(&lines, "u", "c").unwrap(), 2);
	assert_eq!(app.import_lines(&[], "u", "c").unwrap(), 0);

	// Same outcome as ingesting one by one
	assert_eq!(app.ingest("u", "c", "@@@ ###").unwrap(), None);
	assert_eq!(app.stats().unwrap().message_count, 2);
	assert_eq!(app.processing_stats().unwrap()[&3].pending, 2);
}

#[test]
fn test_compaction_failure_keeps_the_message() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("markov.db");
	let store = Arc::new(TransitionStore::open(&path).unwrap());
	let mut app = Generator::new(store, Config {
		compaction_interval: 2,
		..config(vec![2], vec![])
	})
	.unwrap();

	app.ingest("u", "c", "the cat sat").unwrap();

	// An undecodable cache entry for a state the next message touches
	let raw = rusqlite::Connection::open(&path).unwrap();
	raw.execute(
		"INSERT INTO states (order_n, state_text, dist_blob, total_count, updated_at)
		VALUES (2, 'the', X'FF', 1, 0)",
		[],
	)
	.unwrap();

	let id = app.ingest("u", "c", "the dog sat").unwrap();
	assert!(id.is_some());
	assert_eq!(app.model(2).unwrap().count("the", "dog"), 1);

	// Compaction rolled back: the ledger still holds both messages
	let stats = app.stats().unwrap();
	assert_eq!(stats.message_count, 2);
	assert!(stats.transition_count > 0);
	assert_eq!(app.store().load_all(2).unwrap().iter().filter(|r| r.state == "the").count(), 2);
}

#[test]
fn test_import_json_records() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("chat.json");
	fs::write(
		&path,
		r#"[
			{ "content": "the cat sat", "timestamp": 1700000000000 },
			{ "text": "the dog ran" },
			{ "message": "   " },
			{ "other": 1 },
			{ "content": "", "message": "a bird flew" },
			"not a record"
		]"#,
	)
	.unwrap();

	let mut app = generator(config(vec![2], vec![]));
	assert_eq!(app.import_json(&path, "seed", "chat").unwrap(), 3);

	let messages = app.store().get_messages(None, 0).unwrap();
	let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
	assert_eq!(contents, vec!["the cat sat", "the dog ran", "a bird flew"]);
	assert_eq!(messages[0].timestamp, 1_700_000_000_000);
	assert_ne!(messages[1].timestamp, 1_700_000_000_000);
	assert!(messages.iter().all(|m| m.user_id == "seed" && m.channel_id == "chat"));
	assert_eq!(app.model(2).unwrap().count("the", "dog"), 1);
}

#[test]
fn test_import_json_single_record_and_errors() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("one.json");
	fs::write(&path, r#"{ "content": "just one message" }"#).unwrap();

	let mut app = generator(config(vec![2], vec![]));
	assert_eq!(app.import_json(&path, "u", "c").unwrap(), 1);

	fs::write(&path, "[ not json").unwrap();
	assert!(matches!(app.import_json(&path, "u", "c"), Err(MarkovError::Json(_))));
	assert_eq!(app.stats().unwrap().message_count, 1);
}

#[test]
fn test_import_csv_rows() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("forum.csv");
	fs::write(
		&path,
		"user_id,content,timestamp\n\
		alice,the cat sat,1700000000000\n\
		,the dog ran,\n\
		bob,,\n\
		carol,\"hello, world\",later\n",
	)
	.unwrap();

	let mut app = generator(config(vec![2], vec![]));
	assert_eq!(app.import_csv(&path, "forum", "content", "csv_import").unwrap(), 3);

	let messages = app.store().get_messages(None, 0).unwrap();
	let users: Vec<&str> = messages.iter().map(|m| m.user_id.as_str()).collect();
	assert_eq!(users, vec!["alice", "csv_import", "carol"]);
	assert_eq!(messages[0].timestamp, 1_700_000_000_000);
	assert_eq!(messages[2].content, "hello, world");
	assert_eq!(app.model(2).unwrap().count("hello", ","), 1);

	assert!(matches!(
		app.import_csv(&path, "forum", "body", "csv_import"),
		Err(MarkovError::InvalidArgument(_))
	));
}

#[test]
fn test_import_file_picks_reader_by_extension() {
	let dir = tempfile::tempdir().unwrap();
	fs::write(dir.path().join("posts.csv"), "content\nthe cat sat\nthe cat ran\n").unwrap();
	fs::write(dir.path().join("logs.json"), r#"[{ "text": "the dog sat" }]"#).unwrap();

	let mut app = generator(config(vec![2], vec![]));
	assert_eq!(app.import_file(dir.path().join("posts.csv"), "u").unwrap(), 2);
	assert_eq!(app.import_folder(dir.path(), "json", "u").unwrap(), 1);

	let messages = app.store().get_messages(None, 0).unwrap();
	let channels: Vec<&str> = messages.iter().map(|m| m.channel_id.as_str()).collect();
	assert_eq!(channels, vec!["posts", "posts", "logs"]);
	assert!(messages.iter().all(|m| m.user_id == "u"));
}

#[test]
fn test_import_folder() {
	let dir = tempfile::tempdir().unwrap();
	fs::write(dir.path().join("cats.txt"), "the cat sat\nthe cat ran\n").unwrap();
	fs::write(dir.path().join("dogs.txt"), "the dog sat\n\n").unwrap();
	fs::write(dir.path().join("notes.md"), "ignored line\n").unwrap();

	let mut app = generator(config(vec![2], vec![]));
	assert_eq!(app.import_folder(dir.path(), "txt", "u").unwrap(), 3);

	let channels: Vec<String> = app
		.store()
		.get_messages(None, 0)
		.unwrap()
		.into_iter()
		.map(|m| m.channel_id)
		.collect();
	assert_eq!(channels, vec!["cats", "cats", "dogs"]);
	assert_eq!(app.model(2).unwrap().count("the", "cat"), 2);
}

#[test]
fn test_import_folder_requires_directory() {
	let mut app = generator(config(vec![2], vec![]));
	assert!(app.import_folder("/definitely/not/a/folder", "txt", "u").is_err());
}
