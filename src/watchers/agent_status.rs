use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{WatchEvent, Watcher, WatcherSet};
use crate::config::{self, WatcherSettings};
use crate::detection;
use crate::model::{AgentStatusFile, ProjectConfig};

pub fn watcher_name(project: &str) -> String {
	format!("agent-status:{}", project)
}

/// Starts (or restarts) the status-file watcher for one project.
pub fn spawn_for(set: &WatcherSet, project: &ProjectConfig, settings: &WatcherSettings) {
	let name = project.name.clone();
	let path = config::agent_status_path(&project.path);
	let interval = Duration::from_millis(settings.agent_status_interval_ms);
	let stale_after = Duration::from_secs(settings.stale_tab_secs);
	set.spawn(
		watcher_name(&name),
		Arc::new(move || {
			Box::new(AgentStatusWatcher::new(name.clone(), path.clone(), interval, stale_after)) as Box<dyn Watcher>
		}),
	);
}

/// Polls one project's `.agent-project/status.json`.
pub struct AgentStatusWatcher {
	project: String,
	path: PathBuf,
	interval: Duration,
	stale_after: Duration,
	last: String,
}

impl AgentStatusWatcher {
	pub fn new(project: impl Into<String>, path: PathBuf, interval: Duration, stale_after: Duration) -> Self {
		Self {
			project: project.into(),
			path,
			interval,
			stale_after,
			last: "[]".to_string(),
		}
	}

	fn read(&self) -> Option<AgentStatusFile> {
		let raw = match std::fs::read_to_string(&self.path) {
			Ok(raw) => raw,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				return Some(AgentStatusFile::default());
			}
			Err(err) => {
				debug!(event = "agent_status_unreadable", project = %self.project, error = %err);
				return None;
			}
		};
		match serde_json::from_str(&raw) {
			Ok(file) => Some(file),
			Err(err) => {
				// Hooks rewrite the file in place; a torn read settles next tick.
				debug!(event = "agent_status_malformed", project = %self.project, error = %err);
				None
			}
		}
	}
}

#[async_trait]
impl Watcher for AgentStatusWatcher {
	fn name(&self) -> String {
		watcher_name(&self.project)
	}

	fn interval(&self) -> Duration {
		self.interval
	}

	async fn observe(&mut self) -> Result<Vec<WatchEvent>> {
		let Some(file) = self.read() else {
			return Ok(Vec::new());
		};
		let tabs = detection::filter_stale(file.tabs, Utc::now(), self.stale_after);
		let key = serde_json::to_string(&tabs).context("failed to encode agent tabs")?;
		if key == self.last {
			return Ok(Vec::new());
		}
		self.last = key;
		Ok(vec![WatchEvent::AgentTabs {
			project: self.project.clone(),
			tabs,
		}])
	}
}
