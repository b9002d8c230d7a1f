//! Activate, deactivate and switch.
//!
//! Transitions for one project are serialized by a transition lock, separate
//! from the store lock so watchers keep reconciling during the slow steps.
//! Collaborator failures are logged and reported as warnings; nothing is
//! rolled back.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::desktop::DesktopController;
use crate::engine::Engine;
use crate::error::{ManagerError, ManagerResult};
use crate::model::{ProjectStatus, ProjectView};
use crate::protocol::StatePatch;
use crate::tmux::TerminalLauncher;

#[derive(Debug, Clone)]
pub struct Transition {
	pub view: ProjectView,
	pub warnings: Vec<String>,
}

pub struct Activator {
	engine: Arc<Engine>,
	desktop: Arc<dyn DesktopController>,
	terminal: Arc<dyn TerminalLauncher>,
	settle_delay: Duration,
	home_desktop: String,
	transitions: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

fn degraded(warnings: &mut Vec<String>, project: &str, step: &str, err: anyhow::Error) {
	warn!(event = "transition_step_failed", project, step, error = %err);
	warnings.push(format!("{}: {}", step, err));
}

impl Activator {
	pub fn new(
		engine: Arc<Engine>,
		desktop: Arc<dyn DesktopController>,
		terminal: Arc<dyn TerminalLauncher>,
		settle_delay: Duration,
		home_desktop: impl Into<String>,
	) -> Self {
		Self {
			engine,
			desktop,
			terminal,
			settle_delay,
			home_desktop: home_desktop.into(),
			transitions: Mutex::new(HashMap::new()),
		}
	}

	async fn transition_lock(&self, name: &str) -> OwnedMutexGuard<()> {
		let lock = self
			.transitions
			.lock()
			.entry(name.to_string())
			.or_insert_with(|| Arc::new(AsyncMutex::new(())))
			.clone();
		lock.lock_owned().await
	}

	pub async fn activate(&self, name: &str) -> ManagerResult<Transition> {
		let store = self.engine.store();
		let project = store.get(name)?;
		let _transition = self.transition_lock(name).await;

		if store.status(name) != ProjectStatus::Dormant {
			return Ok(Transition {
				view: store.view(name)?,
				warnings: Vec::new(),
			});
		}

		let desktop = project.name.clone();
		info!(event = "activation_started", project = name);
		self.engine
			.update(name, |state| {
				state.status = ProjectStatus::Activating;
				state.desktop = Some(desktop.clone());
				true
			})
			.await?;

		let mut warnings = Vec::new();
		if let Err(err) = self.desktop.create(&desktop).await {
			degraded(&mut warnings, name, "create desktop", err);
		}
		if let Err(err) = self.desktop.switch_to(&desktop).await {
			degraded(&mut warnings, name, "switch desktop", err);
		}
		tokio::time::sleep(self.settle_delay).await;

		let handle = match self.terminal.launch(&desktop, &project.path, &project.terminal).await {
			Ok(handle) => handle,
			Err(err) => {
				degraded(&mut warnings, name, "launch terminal", err);
				None
			}
		};

		let view = self
			.engine
			.update(name, |state| {
				state.status = ProjectStatus::Active;
				state.last_activated = Some(Utc::now());
				state.desktop = Some(desktop.clone());
				state.window_handles.clear();
				if let Some(pid) = handle {
					state.window_handles.insert("terminal".to_string(), pid);
				}
				true
			})
			.await?;
		info!(event = "activation_finished", project = name, warnings = warnings.len());
		Ok(Transition { view, warnings })
	}

	pub async fn deactivate(&self, name: &str, description: Option<String>) -> ManagerResult<Transition> {
		let store = self.engine.store();
		store.get(name)?;
		let _transition = self.transition_lock(name).await;

		let previous = store.load_state(name);
		store.set_status(name, ProjectStatus::Dormant);
		info!(event = "deactivation_started", project = name);

		let mut warnings = Vec::new();
		let desktop = previous.desktop.as_deref();
		if let Some(desktop) = desktop {
			if let Err(err) = self.desktop.close_unpinned_windows(desktop).await {
				degraded(&mut warnings, name, "close windows", err);
			}
			if let Err(err) = self.terminal.close(desktop).await {
				degraded(&mut warnings, name, "close terminal", err);
			}
		}
		if let Err(err) = self.desktop.switch_to(&self.home_desktop).await {
			degraded(&mut warnings, name, "switch home", err);
		}
		if let Some(desktop) = desktop {
			if let Err(err) = self.desktop.remove(desktop).await {
				degraded(&mut warnings, name, "remove desktop", err);
			}
		}

		let view = self
			.engine
			.update(name, |state| {
				state.status = ProjectStatus::Dormant;
				state.last_deactivated = Some(Utc::now());
				state.desktop = None;
				state.window_handles.clear();
				if let Some(description) = description {
					state.state_description = description;
				}
				true
			})
			.await?;
		info!(event = "deactivation_finished", project = name, warnings = warnings.len());
		Ok(Transition { view, warnings })
	}

	/// Focuses an active project's desktop. Changes no state.
	pub async fn switch(&self, name: &str) -> ManagerResult<Transition> {
		let store = self.engine.store();
		store.get(name)?;
		let state = store.load_state(name);
		if state.status != ProjectStatus::Active {
			return Err(ManagerError::validation("Project is not active"));
		}
		let Some(desktop) = state.desktop.as_deref() else {
			return Err(ManagerError::validation("No desktop assigned"));
		};

		let mut warnings = Vec::new();
		if let Err(err) = self.desktop.switch_to(desktop).await {
			degraded(&mut warnings, name, "switch desktop", err);
		}
		Ok(Transition {
			view: store.view(name)?,
			warnings,
		})
	}

	pub async fn patch_state(&self, name: &str, patch: StatePatch) -> ManagerResult<ProjectView> {
		if patch.is_empty() {
			return Err(ManagerError::validation("Nothing to update"));
		}
		self.engine
			.update(name, |state| {
				if let Some(description) = patch.state_description {
					state.state_description = description;
				}
				true
			})
			.await
	}

	pub async fn go_home(&self) -> Vec<String> {
		let mut warnings = Vec::new();
		if let Err(err) = self.desktop.switch_to(&self.home_desktop).await {
			degraded(&mut warnings, "-", "switch home", err);
		}
		warnings
	}
}
