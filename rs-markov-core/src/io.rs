//! Training files on disk: plain text, JSON and CSV.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde_json::Value;

use crate::error::{MarkovError, Result};
use crate::storage::NewMessage;

/// Keys holding the message text in a JSON record, by priority.
const JSON_CONTENT_KEYS: [&str; 3] = ["content", "text", "message"];

/// Non-blank lines of a text file, trimmed.
pub(crate) fn read_lines(path: &Path) -> Result<Vec<String>> {
	let contents = fs::read_to_string(path)?;
	Ok(contents
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_owned)
		.collect())
}

/// Channel a file is imported into: its name without extension.
///
/// `"./data/books.txt"` → `"books"`
pub(crate) fn channel_name(path: &Path) -> Result<String> {
	path.file_stem()
		.map(|stem| stem.to_string_lossy().into_owned())
		.ok_or_else(|| MarkovError::InvalidArgument(format!("no file name in {}", path.display())))
}

/// Files ending in `.{extension}` directly inside `dir`, sorted by path.
pub(crate) fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
	if !dir.is_dir() {
		return Err(MarkovError::InvalidArgument(format!("Expected a directory, got: {}", dir.display())));
	}

	let mut files = Vec::new();
	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if path.is_file() && path.extension() == Some(OsStr::new(extension)) {
			files.push(path);
		}
	}
	files.sort();
	Ok(files)
}

/// Messages of a JSON file holding one record or an array of records.
///
/// The text is the first non-blank string among `content`, `text` and
/// `message`; records without one are skipped. An integer `timestamp`
/// (Unix milliseconds) is kept, anything else means "now".
pub(crate) fn read_json_messages(path: &Path, user_id: &str, channel_id: &str) -> Result<Vec<NewMessage>> {
	let contents = fs::read_to_string(path)?;
	let records = match serde_json::from_str::<Value>(&contents)? {
		Value::Array(records) => records,
		record => vec![record],
	};

	Ok(records
		.iter()
		.filter_map(|record| json_message(record, user_id, channel_id))
		.collect())
}

fn json_message(record: &Value, user_id: &str, channel_id: &str) -> Option<NewMessage> {
	let content = JSON_CONTENT_KEYS
		.iter()
		.filter_map(|key| record.get(*key)?.as_str())
		.map(str::trim)
		.find(|text| !text.is_empty())?;

	let mut message = NewMessage::new(user_id, channel_id, content);
	message.timestamp = record.get("timestamp").and_then(Value::as_i64);
	Some(message)
}

/// Messages of a CSV file with a header row.
///
/// `content_column` holds the text. Optional `user_id` and `timestamp`
/// columns override `default_user` and "now" per row. Rows with empty
/// content are skipped, malformed rows are logged and skipped.
///
/// # Errors
/// - `InvalidArgument` when `content_column` is not in the header
pub(crate) fn read_csv_messages(
	path: &Path,
	channel_id: &str,
	content_column: &str,
	default_user: &str,
) -> Result<Vec<NewMessage>> {
	let mut reader = csv::ReaderBuilder::new()
		.has_headers(true)
		.flexible(true)
		.from_path(path)?;

	let headers = reader.headers()?.clone();
	let column = |name: &str| headers.iter().position(|header| header.trim() == name);
	let content_idx = column(content_column).ok_or_else(|| {
		MarkovError::InvalidArgument(format!(
			"column '{content_column}' not found in {}, available: {}",
			path.display(),
			headers.iter().collect::<Vec<_>>().join(", ")
		))
	})?;
	let user_idx = column("user_id");
	let timestamp_idx = column("timestamp");

	let mut messages = Vec::new();
	for record in reader.records() {
		let record = match record {
			Ok(record) => record,
			Err(e) => {
				warn!("skipping malformed CSV row in {}: {e}", path.display());
				continue;
			}
		};

		let Some(content) = record.get(content_idx).map(str::trim).filter(|text| !text.is_empty()) else {
			continue;
		};
		let user_id = user_idx
			.and_then(|i| record.get(i))
			.map(str::trim)
			.filter(|user| !user.is_empty())
			.unwrap_or(default_user);

		let mut message = NewMessage::new(user_id, channel_id, content);
		message.timestamp = timestamp_idx
			.and_then(|i| record.get(i))
			.and_then(|raw| raw.trim().parse().ok());
		messages.push(message);
	}
	Ok(messages)
}
