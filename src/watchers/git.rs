use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{WatchEvent, Watcher};
use crate::git::GitInspector;
use crate::model::ProjectStatus;
use crate::store::EntityStore;

/// Polls git for every active project, emitting only when branch or summary
/// moved away from the cached state.
pub struct GitWatcher {
	store: Arc<EntityStore>,
	git: Arc<dyn GitInspector>,
	interval: Duration,
}

impl GitWatcher {
	pub fn new(store: Arc<EntityStore>, git: Arc<dyn GitInspector>, interval: Duration) -> Self {
		Self {
			store,
			git,
			interval,
		}
	}
}

#[async_trait]
impl Watcher for GitWatcher {
	fn name(&self) -> String {
		"git".to_string()
	}

	fn interval(&self) -> Duration {
		self.interval
	}

	async fn observe(&mut self) -> Result<Vec<WatchEvent>> {
		let mut events = Vec::new();
		for project in self.store.list() {
			if self.store.status(&project.name) != ProjectStatus::Active {
				continue;
			}
			let info = self.git.info(&project.path).await;
			let state = self.store.load_state(&project.name);
			if state.git_branch != info.branch || state.git_status_summary != info.status_summary {
				events.push(WatchEvent::Git {
					project: project.name,
					branch: info.branch,
					summary: info.status_summary,
				});
			}
		}
		Ok(events)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::git::GitInfo;
	use crate::model::{ProjectConfig, ProjectState};
	use crate::store::tests::store_with;

	struct FixedGit;

	#[async_trait]
	impl GitInspector for FixedGit {
		async fn info(&self, _path: &str) -> GitInfo {
			GitInfo {
				branch: "main".to_string(),
				status_summary: "1M".to_string(),
			}
		}
	}

	#[tokio::test]
	async fn test_only_active_changed_projects_emit() {
		let (_temp, store) = store_with(vec![
			ProjectConfig::new("web", "/src/web"),
			ProjectConfig::new("api", "/src/api"),
			ProjectConfig::new("docs", "/src/docs"),
		]);
		let store = Arc::new(store);
		store.set_status("web", ProjectStatus::Active);
		store.set_status("api", ProjectStatus::Active);
		store
			.save_state(
				"api",
				&ProjectState {
					git_branch: "main".to_string(),
					git_status_summary: "1M".to_string(),
					..ProjectState::default()
				},
			)
			.unwrap();

		let mut watcher = GitWatcher::new(store, Arc::new(FixedGit), Duration::from_secs(10));
		let events = watcher.observe().await.unwrap();
		assert_eq!(
			events,
			vec![WatchEvent::Git {
				project: "web".to_string(),
				branch: "main".to_string(),
				summary: "1M".to_string(),
			}]
		);
	}
}
