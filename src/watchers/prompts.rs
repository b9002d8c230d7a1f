use anyhow::Result;
use async_trait::async_trait;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher as _};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{WatchEvent, Watcher};
use crate::model::PromptEntry;
use crate::store::EntityStore;

/// One line of the shared prompt history log.
#[derive(Debug, Deserialize)]
struct HistoryRecord {
	display: String,
	timestamp: i64,
	#[serde(default)]
	project: Option<String>,
}

fn parse_record(line: &str, store: &EntityStore) -> Option<PromptEntry> {
	let record: HistoryRecord = match serde_json::from_str(line) {
		Ok(record) => record,
		Err(err) => {
			debug!(event = "history_line_skipped", error = %err);
			return None;
		}
	};
	let project = match record.project.as_deref() {
		Some(path) if !path.is_empty() => store.resolve_project(path),
		_ => "unknown".to_string(),
	};
	Some(PromptEntry {
		timestamp: record.timestamp,
		project,
		text: record.display,
	})
}

/// The last `count` prompts of the log, newest first.
pub fn load_recent_prompts(path: &Path, count: usize, store: &EntityStore) -> Vec<PromptEntry> {
	let content = match std::fs::read_to_string(path) {
		Ok(content) => content,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
		Err(err) => {
			warn!(event = "history_unreadable", path = %path.display(), error = %err);
			return Vec::new();
		}
	};
	let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
	let start = lines.len().saturating_sub(count);
	let mut entries: Vec<PromptEntry> = lines[start..]
		.iter()
		.filter_map(|line| parse_record(line, store))
		.collect();
	entries.reverse();
	entries
}

/// Tails the prompt log from the size it had at startup. Woken by filesystem
/// notifications, with a periodic poll as the fallback.
pub struct PromptWatcher {
	path: PathBuf,
	store: Arc<EntityStore>,
	offset: u64,
	interval: Duration,
	_fs: Option<RecommendedWatcher>,
	changes: Option<mpsc::Receiver<()>>,
}

impl PromptWatcher {
	pub fn new(path: PathBuf, store: Arc<EntityStore>, interval: Duration) -> Self {
		let offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
		let (fs, changes) = match setup_notify(&path) {
			Ok((fs, rx)) => (Some(fs), Some(rx)),
			Err(err) => {
				debug!(event = "history_notify_unavailable", path = %path.display(), error = %err);
				(None, None)
			}
		};
		Self {
			path,
			store,
			offset,
			interval,
			_fs: fs,
			changes,
		}
	}

	fn read_appended(&mut self) -> Result<Vec<PromptEntry>> {
		let mut file = match File::open(&self.path) {
			Ok(file) => file,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(err) => return Err(err.into()),
		};
		let len = file.metadata()?.len();
		if len < self.offset {
			debug!(event = "history_shrunk", from = self.offset, to = len);
			self.offset = len;
			return Ok(Vec::new());
		}
		if len == self.offset {
			return Ok(Vec::new());
		}

		file.seek(SeekFrom::Start(self.offset))?;
		let mut buf = Vec::with_capacity((len - self.offset) as usize);
		file.take(len - self.offset).read_to_end(&mut buf)?;

		// Stop at the last newline; a partial record waits for the next read.
		let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
			return Ok(Vec::new());
		};
		self.offset += (end + 1) as u64;

		let text = String::from_utf8_lossy(&buf[..end]);
		Ok(text
			.lines()
			.filter(|l| !l.trim().is_empty())
			.filter_map(|line| parse_record(line, &self.store))
			.collect())
	}
}

fn setup_notify(path: &Path) -> Result<(RecommendedWatcher, mpsc::Receiver<()>)> {
	let dir = path
		.parent()
		.ok_or_else(|| anyhow::anyhow!("history path has no parent directory"))?;
	let file_name = path.file_name().map(|n| n.to_os_string());
	let (tx, rx) = mpsc::channel(1);
	let mut watcher = RecommendedWatcher::new(
		move |res: notify::Result<notify::Event>| {
			if let Ok(event) = res {
				if event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
					let _ = tx.try_send(());
				}
			}
		},
		Config::default(),
	)?;
	watcher.watch(dir, RecursiveMode::NonRecursive)?;
	Ok((watcher, rx))
}

#[async_trait]
impl Watcher for PromptWatcher {
	fn name(&self) -> String {
		"prompts".to_string()
	}

	fn interval(&self) -> Duration {
		self.interval
	}

	async fn observe(&mut self) -> Result<Vec<WatchEvent>> {
		Ok(self
			.read_appended()?
			.into_iter()
			.map(WatchEvent::Prompt)
			.collect())
	}

	async fn wait(&mut self) {
		let interval = self.interval;
		let Some(changes) = self.changes.as_mut() else {
			tokio::time::sleep(interval).await;
			return;
		};
		let closed = tokio::select! {
			changed = changes.recv() => changed.is_none(),
			_ = tokio::time::sleep(interval) => false,
		};
		if closed {
			self.changes = None;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::ProjectConfig;
	use crate::store::tests::store_with;
	use std::io::Write;
	use tempfile::TempDir;

	fn line(display: &str, ts: i64, project: Option<&str>) -> String {
		let mut value = serde_json::json!({ "display": display, "timestamp": ts, "sessionId": "abc" });
		if let Some(project) = project {
			value["project"] = serde_json::json!(project);
		}
		format!("{}\n", value)
	}

	fn append(path: &Path, text: &str) {
		let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
		file.write_all(text.as_bytes()).unwrap();
	}

	#[tokio::test]
	async fn test_appended_lines_become_prompts_in_order() {
		let temp = TempDir::new().unwrap();
		let history = temp.path().join("history.jsonl");
		append(&history, &line("old prompt", 1, Some("/src/web")));

		let (_state, store) = store_with(vec![ProjectConfig::new("website", "/src/web")]);
		let mut watcher = PromptWatcher::new(history.clone(), Arc::new(store), Duration::from_secs(1));
		assert!(watcher.observe().await.unwrap().is_empty());

		append(&history, &line("fix the header", 10, Some("/src/web")));
		append(&history, &line("write a parser", 11, Some("/home/me/code/parser")));
		append(&history, &line("no project", 12, None));

		let events = watcher.observe().await.unwrap();
		assert_eq!(
			events,
			vec![
				WatchEvent::Prompt(PromptEntry {
					timestamp: 10,
					project: "website".to_string(),
					text: "fix the header".to_string(),
				}),
				WatchEvent::Prompt(PromptEntry {
					timestamp: 11,
					project: "parser".to_string(),
					text: "write a parser".to_string(),
				}),
				WatchEvent::Prompt(PromptEntry {
					timestamp: 12,
					project: "unknown".to_string(),
					text: "no project".to_string(),
				}),
			]
		);
	}

	#[tokio::test]
	async fn test_partial_line_waits_for_newline() {
		let temp = TempDir::new().unwrap();
		let history = temp.path().join("history.jsonl");
		let (_state, store) = store_with(vec![]);
		let mut watcher = PromptWatcher::new(history.clone(), Arc::new(store), Duration::from_secs(1));

		let full = line("split write", 20, None);
		let (head, tail) = full.split_at(15);
		append(&history, head);
		assert!(watcher.observe().await.unwrap().is_empty());

		append(&history, tail);
		let events = watcher.observe().await.unwrap();
		assert_eq!(events.len(), 1);
		assert!(matches!(&events[0], WatchEvent::Prompt(p) if p.text == "split write"));
	}

	#[tokio::test]
	async fn test_shrunk_log_resets_offset() {
		let temp = TempDir::new().unwrap();
		let history = temp.path().join("history.jsonl");
		append(&history, &line("one", 1, None));
		append(&history, &line("two", 2, None));
		let (_state, store) = store_with(vec![]);
		let mut watcher = PromptWatcher::new(history.clone(), Arc::new(store), Duration::from_secs(1));

		std::fs::write(&history, "").unwrap();
		assert!(watcher.observe().await.unwrap().is_empty());
		append(&history, &line("three", 3, None));
		let events = watcher.observe().await.unwrap();
		assert!(matches!(&events[..], [WatchEvent::Prompt(p)] if p.text == "three"));
	}

	#[test]
	fn test_recent_prompts_are_newest_first_and_bounded() {
		let temp = TempDir::new().unwrap();
		let history = temp.path().join("history.jsonl");
		for i in 0..5 {
			append(&history, &line(&format!("prompt {}", i), i, None));
		}
		append(&history, "not json\n");
		let (_state, store) = store_with(vec![]);

		let recent = load_recent_prompts(&history, 3, &store);
		let texts: Vec<_> = recent.iter().map(|p| p.text.as_str()).collect();
		assert_eq!(texts, vec!["prompt 4", "prompt 3"]);
		assert!(load_recent_prompts(&temp.path().join("missing"), 3, &store).is_empty());
	}
}
