//! Entity store for project configuration and per-project runtime state.
//!
//! Configuration is read through a [`ConfigLoader`]; runtime state lives in
//! `<state dir>/<project>.json`. The transient `status` is kept in an
//! in-memory map that starts empty on every process start, so every project
//! comes up dormant regardless of what was on disk.

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::{self, ConfigLoader, GlobalConfig};
use crate::error::{ManagerError, ManagerResult};
use crate::model::{
	AgentTab, LiveTabs, ProjectConfig, ProjectState, ProjectStatus, ProjectView, StateRecord,
};

pub struct EntityStore {
	loader: Box<dyn ConfigLoader>,
	cached: RwLock<GlobalConfig>,
	state_dir: PathBuf,
	statuses: Mutex<HashMap<String, ProjectStatus>>,
	live: Mutex<HashMap<String, LiveTabs>>,
	locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EntityStore {
	pub fn new(loader: Box<dyn ConfigLoader>, initial: GlobalConfig, state_dir: PathBuf) -> Self {
		Self {
			loader,
			cached: RwLock::new(initial),
			state_dir,
			statuses: Mutex::new(HashMap::new()),
			live: Mutex::new(HashMap::new()),
			locks: Mutex::new(HashMap::new()),
		}
	}

	/// Current configuration. A config file that fails to load keeps the last
	/// good copy in service.
	pub fn config(&self) -> GlobalConfig {
		match self.loader.load() {
			Ok(cfg) => {
				*self.cached.write() = cfg.clone();
				cfg
			}
			Err(err) => {
				warn!(event = "config_load_failed", error = %err, "using last good config");
				self.cached.read().clone()
			}
		}
	}

	/// Fresh copy for read-modify-save. Fails rather than handing out the
	/// cached fallback.
	fn writable_config(&self) -> ManagerResult<GlobalConfig> {
		match self.loader.load() {
			Ok(cfg) => {
				*self.cached.write() = cfg.clone();
				Ok(cfg)
			}
			Err(err) => {
				warn!(event = "config_unwritable", error = %format!("{:#}", err));
				Err(ManagerError::conflict(format!(
					"Configuration file is unreadable, fix it before changing projects: {:#}",
					err
				)))
			}
		}
	}

	pub fn list(&self) -> Vec<ProjectConfig> {
		self.config().projects
	}

	pub fn get(&self, name: &str) -> ManagerResult<ProjectConfig> {
		self.list()
			.into_iter()
			.find(|p| p.name == name)
			.ok_or_else(|| ManagerError::NotFound(name.to_string()))
	}

	fn state_path(&self, name: &str) -> PathBuf {
		let safe_name = name.replace(['/', '\\'], "_").replace("..", "_");
		self.state_dir.join(format!("{}.json", safe_name))
	}

	/// Never fails: a missing or unreadable state file yields the defaults.
	pub fn load_state(&self, name: &str) -> ProjectState {
		let status = self.status(name);
		let path = self.state_path(name);
		let record = match fs::read_to_string(&path) {
			Ok(raw) => match serde_json::from_str::<StateRecord>(&raw) {
				Ok(record) => record,
				Err(err) => {
					warn!(event = "state_malformed", project = name, path = %path.display(), error = %err);
					StateRecord::default()
				}
			},
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => StateRecord::default(),
			Err(err) => {
				warn!(event = "state_unreadable", project = name, path = %path.display(), error = %err);
				StateRecord::default()
			}
		};
		record.into_state(status)
	}

	/// Persists everything but `status`. Written through a temp file so a
	/// concurrent reader never sees a torn document.
	pub fn save_state(&self, name: &str, state: &ProjectState) -> ManagerResult<()> {
		fs::create_dir_all(&self.state_dir)?;
		let path = self.state_path(name);
		let json = serde_json::to_string_pretty(&StateRecord::from(state))
			.context("Failed to serialize project state")?;
		write_atomic(&path, json.as_bytes())?;
		debug!(event = "state_saved", project = name);
		Ok(())
	}

	pub fn status(&self, name: &str) -> ProjectStatus {
		self.statuses.lock().get(name).copied().unwrap_or_default()
	}

	pub fn set_status(&self, name: &str, status: ProjectStatus) {
		self.statuses.lock().insert(name.to_string(), status);
	}

	pub fn live_tabs(&self, name: &str) -> LiveTabs {
		self.live.lock().get(name).cloned().unwrap_or_default()
	}

	pub fn set_live_titles(&self, name: &str, titles: Vec<String>) {
		self.live.lock().entry(name.to_string()).or_default().titles = titles;
	}

	pub fn set_agent_tabs(&self, name: &str, tabs: Vec<AgentTab>) {
		self.live.lock().entry(name.to_string()).or_default().agent_tabs = tabs;
	}

	/// Serializes writers of one project's state and tasks.
	pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.locks.lock();
			locks
				.entry(name.to_string())
				.or_insert_with(|| Arc::new(AsyncMutex::new(())))
				.clone()
		};
		lock.lock_owned().await
	}

	pub fn register(&self, project: ProjectConfig) -> ManagerResult<()> {
		if project.name.trim().is_empty() {
			return Err(ManagerError::validation("name is required"));
		}
		if project.name.contains(['/', '\\']) || project.name == ".." {
			return Err(ManagerError::validation("name must not contain path separators"));
		}
		if project.path.trim().is_empty() {
			return Err(ManagerError::validation("path is required"));
		}
		let mut cfg = self.writable_config()?;
		if cfg.projects.iter().any(|p| p.name == project.name) {
			return Err(ManagerError::conflict("Project name already exists"));
		}
		cfg.projects.push(project);
		self.loader.save(&cfg)?;
		*self.cached.write() = cfg;
		Ok(())
	}

	pub fn remove(&self, name: &str) -> ManagerResult<ProjectConfig> {
		let mut cfg = self.writable_config()?;
		let Some(index) = cfg.projects.iter().position(|p| p.name == name) else {
			return Err(ManagerError::NotFound(name.to_string()));
		};
		if self.status(name) != ProjectStatus::Dormant {
			return Err(ManagerError::conflict("Deactivate the project before removing it"));
		}
		let removed = cfg.projects.remove(index);
		self.loader.save(&cfg)?;
		*self.cached.write() = cfg;

		let path = self.state_path(name);
		if path.exists() {
			fs::remove_file(&path)?;
		}
		self.statuses.lock().remove(name);
		self.live.lock().remove(name);
		Ok(removed)
	}

	/// Maps a filesystem path to a project name, falling back to the path's
	/// last segment for paths no project is registered at.
	pub fn resolve_project(&self, path: &str) -> String {
		let wanted = path.trim_end_matches('/');
		if let Some(project) = self
			.list()
			.into_iter()
			.find(|p| p.path.trim_end_matches('/') == wanted)
		{
			return project.name;
		}
		Path::new(wanted)
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| path.to_string())
	}

	pub fn view(&self, name: &str) -> ManagerResult<ProjectView> {
		let config = self.get(name)?;
		Ok(self.view_of(config))
	}

	pub fn views(&self) -> Vec<ProjectView> {
		self.list().into_iter().map(|cfg| self.view_of(cfg)).collect()
	}

	fn view_of(&self, config: ProjectConfig) -> ProjectView {
		let state = self.load_state(&config.name);
		let live = self.live_tabs(&config.name);
		ProjectView {
			name: config.name.clone(),
			config,
			state,
			live_tabs: live.titles,
			agent_tabs: live.agent_tabs,
		}
	}

	pub fn tasks(&self, name: &str) -> ManagerResult<Vec<String>> {
		let project = self.get(name)?;
		let path = config::tasks_path(&project.path);
		let raw = match fs::read_to_string(&path) {
			Ok(raw) => raw,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(err) => {
				warn!(event = "tasks_unreadable", project = name, error = %err);
				return Ok(Vec::new());
			}
		};
		match serde_json::from_str::<Vec<String>>(&raw) {
			Ok(tasks) => Ok(tasks),
			Err(err) => {
				warn!(event = "tasks_malformed", project = name, error = %err);
				Ok(Vec::new())
			}
		}
	}

	pub fn save_tasks(&self, name: &str, tasks: &[String]) -> ManagerResult<()> {
		let project = self.get(name)?;
		let path = config::tasks_path(&project.path);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		let json = serde_json::to_string_pretty(tasks).context("Failed to serialize tasks")?;
		write_atomic(&path, json.as_bytes())?;
		Ok(())
	}
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
	let tmp = path.with_extension("json.tmp");
	fs::write(&tmp, contents)?;
	fs::rename(&tmp, path)
}
