use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{WatchEvent, Watcher};
use crate::detection::{self, TitlePredicate};
use crate::model::ProjectStatus;
use crate::sound::NotificationSink;
use crate::store::EntityStore;
use crate::tmux::TerminalLauncher;

/// Tracks which terminal tabs of each active project are busy. A busy title
/// that disappears means that tab finished, which plays the completion cue.
pub struct TerminalTabsWatcher {
	store: Arc<EntityStore>,
	terminal: Arc<dyn TerminalLauncher>,
	predicate: TitlePredicate,
	sink: Arc<dyn NotificationSink>,
	interval: Duration,
	previous: HashMap<String, Vec<String>>,
}

impl TerminalTabsWatcher {
	pub fn new(
		store: Arc<EntityStore>,
		terminal: Arc<dyn TerminalLauncher>,
		predicate: TitlePredicate,
		sink: Arc<dyn NotificationSink>,
		interval: Duration,
	) -> Self {
		Self {
			store,
			terminal,
			predicate,
			sink,
			interval,
			previous: HashMap::new(),
		}
	}
}

#[async_trait]
impl Watcher for TerminalTabsWatcher {
	fn name(&self) -> String {
		"terminal-tabs".to_string()
	}

	fn interval(&self) -> Duration {
		self.interval
	}

	async fn observe(&mut self) -> Result<Vec<WatchEvent>> {
		let mut events = Vec::new();
		for project in self.store.list() {
			let name = project.name;
			let state = self.store.load_state(&name);
			let desktop = match (&state.status, &state.desktop) {
				(ProjectStatus::Active, Some(desktop)) => desktop.clone(),
				_ => {
					// Gone dormant: clear what clients still show, quietly.
					if self.previous.remove(&name).is_some_and(|prev| !prev.is_empty()) {
						events.push(WatchEvent::LiveTabs {
							project: name,
							titles: Vec::new(),
						});
					}
					continue;
				}
			};

			let titles = match self.terminal.tab_titles(&desktop).await {
				Ok(titles) => titles,
				Err(err) => {
					warn!(event = "tab_titles_failed", project = %name, error = %err);
					continue;
				}
			};
			let busy = self.predicate.processing_titles(&titles);
			let prev = self.previous.get(&name).cloned().unwrap_or_default();
			if busy == prev {
				continue;
			}
			if detection::any_finished(&prev, &busy) {
				debug!(event = "tab_finished", project = %name);
				self.sink.play();
			}
			self.previous.insert(name.clone(), busy.clone());
			events.push(WatchEvent::LiveTabs {
				project: name,
				titles: busy,
			});
		}
		Ok(events)
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::model::{ProjectConfig, ProjectState, TerminalConfig};
	use crate::sound::CountingSink;
	use crate::store::tests::store_with;
	use parking_lot::Mutex;

	/// Terminal launcher that records calls and serves scripted titles.
	#[derive(Default)]
	pub(crate) struct FakeTerminal {
		pub titles: Mutex<Vec<String>>,
		pub calls: Mutex<Vec<String>>,
		pub handle: Option<u32>,
	}

	#[async_trait]
	impl TerminalLauncher for FakeTerminal {
		async fn launch(&self, name: &str, _path: &str, terminal: &TerminalConfig) -> Result<Option<u32>> {
			self.calls.lock().push(format!("launch:{}:{}", name, terminal.tabs.len()));
			Ok(self.handle)
		}

		async fn close(&self, name: &str) -> Result<()> {
			self.calls.lock().push(format!("close:{}", name));
			Ok(())
		}

		async fn tab_titles(&self, _name: &str) -> Result<Vec<String>> {
			Ok(self.titles.lock().clone())
		}
	}

	fn titles(items: &[&str]) -> Vec<String> {
		items.iter().map(|s| s.to_string()).collect()
	}

	#[tokio::test]
	async fn test_finished_title_plays_sound_once() {
		let (_temp, store) = store_with(vec![ProjectConfig::new("web", "/src/web")]);
		store
			.save_state(
				"web",
				&ProjectState {
					desktop: Some("web".to_string()),
					..ProjectState::default()
				},
			)
			.unwrap();
		store.set_status("web", ProjectStatus::Active);

		let terminal = Arc::new(FakeTerminal::default());
		let sink = Arc::new(CountingSink::new());
		let mut watcher = TerminalTabsWatcher::new(
			Arc::new(store),
			terminal.clone(),
			TitlePredicate::default(),
			sink.clone(),
			Duration::from_secs(3),
		);

		*terminal.titles.lock() = titles(&["✳ Fix login", "zsh", "⠐ Run tests"]);
		let events = watcher.observe().await.unwrap();
		assert_eq!(
			events,
			vec![WatchEvent::LiveTabs {
				project: "web".to_string(),
				titles: titles(&["✳ Fix login", "⠐ Run tests"]),
			}]
		);
		assert!(watcher.observe().await.unwrap().is_empty());
		assert_eq!(sink.count(), 0);

		*terminal.titles.lock() = titles(&["claude", "zsh", "⠐ Run tests"]);
		let events = watcher.observe().await.unwrap();
		assert_eq!(events.len(), 1);
		assert_eq!(sink.count(), 1);
	}

	#[tokio::test]
	async fn test_dormant_project_clears_its_tabs() {
		let (_temp, store) = store_with(vec![ProjectConfig::new("web", "/src/web")]);
		let store = Arc::new(store);
		store
			.save_state(
				"web",
				&ProjectState {
					desktop: Some("web".to_string()),
					..ProjectState::default()
				},
			)
			.unwrap();
		store.set_status("web", ProjectStatus::Active);

		let terminal = Arc::new(FakeTerminal::default());
		*terminal.titles.lock() = titles(&["✳ Build"]);
		let sink = Arc::new(CountingSink::new());
		let mut watcher = TerminalTabsWatcher::new(
			store.clone(),
			terminal,
			TitlePredicate::default(),
			sink.clone(),
			Duration::from_secs(3),
		);
		assert_eq!(watcher.observe().await.unwrap().len(), 1);

		store.set_status("web", ProjectStatus::Dormant);
		assert_eq!(
			watcher.observe().await.unwrap(),
			vec![WatchEvent::LiveTabs {
				project: "web".to_string(),
				titles: Vec::new(),
			}]
		);
		assert!(watcher.observe().await.unwrap().is_empty());
		assert_eq!(sink.count(), 0);
	}
}
