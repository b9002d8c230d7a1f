//! External signal watchers and the supervisor that keeps them running.
//!
//! A watcher turns one raw signal (git output, a status file, the prompt
//! log, the focused desktop, terminal titles) into [`WatchEvent`]s. Each runs
//! as its own task; failed observations are logged and the loop carries on,
//! and a watcher whose task panics is rebuilt from its factory.

pub mod agent_status;
pub mod desktop;
pub mod git;
pub mod prompts;
pub mod tabs;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::model::{AgentTab, PromptEntry};

const RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
	Git {
		project: String,
		branch: String,
		summary: String,
	},
	AgentTabs {
		project: String,
		tabs: Vec<AgentTab>,
	},
	Prompt(PromptEntry),
	Desktop(String),
	LiveTabs {
		project: String,
		titles: Vec<String>,
	},
}

#[async_trait]
pub trait Watcher: Send {
	fn name(&self) -> String;

	fn interval(&self) -> Duration;

	async fn observe(&mut self) -> Result<Vec<WatchEvent>>;

	/// Pause between observations. Event-driven watchers return early when
	/// their source signals a change.
	async fn wait(&mut self) {
		tokio::time::sleep(self.interval()).await;
	}
}

pub type WatcherFactory = Arc<dyn Fn() -> Box<dyn Watcher> + Send + Sync>;

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		self.0.abort();
	}
}

/// Running watchers by name.
pub struct WatcherSet {
	events: mpsc::Sender<WatchEvent>,
	tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl WatcherSet {
	pub fn new(events: mpsc::Sender<WatchEvent>) -> Self {
		Self {
			events,
			tasks: Mutex::new(HashMap::new()),
		}
	}

	/// Starts a supervised watcher, replacing one already running under the
	/// same name.
	pub fn spawn(&self, name: impl Into<String>, factory: WatcherFactory) {
		let name = name.into();
		let events = self.events.clone();
		let supervised = name.clone();
		let handle = tokio::spawn(async move {
			loop {
				let watcher = factory();
				let mut run = AbortOnDrop(tokio::spawn(run_watcher(watcher, events.clone())));
				match (&mut run.0).await {
					Ok(()) => break,
					Err(err) if err.is_panic() => {
						error!(event = "watcher_panicked", watcher = %supervised, "restarting");
						tokio::time::sleep(RESTART_DELAY).await;
					}
					Err(_) => break,
				}
			}
		});
		if let Some(old) = self.tasks.lock().insert(name, handle) {
			old.abort();
		}
	}

	pub fn stop(&self, name: &str) {
		if let Some(handle) = self.tasks.lock().remove(name) {
			handle.abort();
			debug!(event = "watcher_stopped", watcher = name);
		}
	}

	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
		names.sort();
		names
	}

	pub fn shutdown(&self) {
		let mut tasks = self.tasks.lock();
		for (_, handle) in tasks.drain() {
			handle.abort();
		}
		info!(event = "watchers_stopped");
	}
}

async fn run_watcher(mut watcher: Box<dyn Watcher>, events: mpsc::Sender<WatchEvent>) {
	let name = watcher.name();
	debug!(event = "watcher_started", watcher = %name);
	loop {
		match watcher.observe().await {
			Ok(batch) => {
				for event in batch {
					if events.send(event).await.is_err() {
						// Engine is gone; nothing left to feed.
						return;
					}
				}
			}
			Err(err) => warn!(event = "watch_failed", watcher = %name, error = %err),
		}
		watcher.wait().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct Flaky {
		builds: Arc<AtomicUsize>,
		ticks: usize,
	}

	#[async_trait]
	impl Watcher for Flaky {
		fn name(&self) -> String {
			"flaky".to_string()
		}

		fn interval(&self) -> Duration {
			Duration::from_millis(5)
		}

		async fn observe(&mut self) -> Result<Vec<WatchEvent>> {
			self.ticks += 1;
			let build = self.builds.load(Ordering::SeqCst);
			if build == 1 && self.ticks == 2 {
				panic!("first build dies on its second tick");
			}
			if self.ticks % 2 == 0 {
				anyhow::bail!("transient");
			}
			Ok(vec![WatchEvent::Desktop(format!("{}-{}", build, self.ticks))])
		}
	}

	#[tokio::test]
	async fn test_supervisor_survives_errors_and_panics() {
		let (tx, mut rx) = mpsc::channel(16);
		let set = WatcherSet::new(tx);
		let builds = Arc::new(AtomicUsize::new(0));
		let counter = builds.clone();
		set.spawn(
			"flaky",
			Arc::new(move || {
				counter.fetch_add(1, Ordering::SeqCst);
				Box::new(Flaky {
					builds: counter.clone(),
					ticks: 0,
				}) as Box<dyn Watcher>
			}),
		);

		assert_eq!(rx.recv().await, Some(WatchEvent::Desktop("1-1".to_string())));
		// Rebuilt after the panic; the error on tick 2 is only logged.
		assert_eq!(rx.recv().await, Some(WatchEvent::Desktop("2-1".to_string())));
		assert_eq!(rx.recv().await, Some(WatchEvent::Desktop("2-3".to_string())));
		assert_eq!(set.names(), vec!["flaky"]);

		set.shutdown();
		assert!(set.names().is_empty());
	}
}
