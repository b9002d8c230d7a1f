//! Reconciliation and broadcast.
//!
//! Every change to a project goes through [`Engine::update`]: the project's
//! store lock is taken, state is loaded, mutated and saved, and the new
//! projection is broadcast before the lock is released. Broadcasts for one
//! project therefore leave in the order their changes were applied.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::detection;
use crate::error::ManagerResult;
use crate::hub::Hub;
use crate::model::{ProjectState, ProjectView, PromptEntry, TabState};
use crate::protocol::ServerMessage;
use crate::sound::NotificationSink;
use crate::store::EntityStore;
use crate::watchers::WatchEvent;

pub struct Engine {
	store: Arc<EntityStore>,
	hub: Arc<Hub>,
	sink: Arc<dyn NotificationSink>,
	prompt_limit: usize,
	prompts: Mutex<VecDeque<PromptEntry>>,
	desktop: Mutex<Option<String>>,
	tab_states: Mutex<HashMap<String, HashMap<String, TabState>>>,
}

impl Engine {
	pub fn new(
		store: Arc<EntityStore>,
		hub: Arc<Hub>,
		sink: Arc<dyn NotificationSink>,
		prompt_limit: usize,
	) -> Self {
		Self {
			store,
			hub,
			sink,
			prompt_limit,
			prompts: Mutex::new(VecDeque::new()),
			desktop: Mutex::new(None),
			tab_states: Mutex::new(HashMap::new()),
		}
	}

	pub fn store(&self) -> &Arc<EntityStore> {
		&self.store
	}

	pub fn hub(&self) -> &Arc<Hub> {
		&self.hub
	}

	/// Applies `mutate` to the project's state. When it reports a change the
	/// state (and status) is written and one `project_update` goes out.
	pub async fn update<F>(&self, name: &str, mutate: F) -> ManagerResult<ProjectView>
	where
		F: FnOnce(&mut ProjectState) -> bool,
	{
		self.store.get(name)?;
		let _guard = self.store.lock(name).await;
		let mut state = self.store.load_state(name);
		let before = state.status;
		if !mutate(&mut state) {
			return self.store.view(name);
		}
		if state.status != before {
			self.store.set_status(name, state.status);
		}
		self.store.save_state(name, &state)?;
		let view = self.store.view(name)?;
		self.hub.broadcast(&ServerMessage::ProjectUpdate { data: view.clone() });
		Ok(view)
	}

	/// Edits a project's task list under its lock and broadcasts the result.
	pub async fn update_tasks<F>(&self, name: &str, edit: F) -> ManagerResult<Vec<String>>
	where
		F: FnOnce(&mut Vec<String>) -> ManagerResult<()>,
	{
		self.store.get(name)?;
		let _guard = self.store.lock(name).await;
		let mut tasks = self.store.tasks(name)?;
		edit(&mut tasks)?;
		self.store.save_tasks(name, &tasks)?;
		self.hub.broadcast(&ServerMessage::Tasks {
			project: name.to_string(),
			data: tasks.clone(),
		});
		Ok(tasks)
	}

	pub fn publish_projects(&self) {
		self.hub.broadcast(&ServerMessage::Projects {
			data: self.store.views(),
		});
	}

	/// Recent prompts, newest first.
	pub fn prompts(&self) -> Vec<PromptEntry> {
		self.prompts.lock().iter().cloned().collect()
	}

	pub fn seed_prompts(&self, newest_first: Vec<PromptEntry>) {
		let mut prompts = self.prompts.lock();
		prompts.clear();
		prompts.extend(newest_first.into_iter().take(self.prompt_limit));
	}

	pub fn current_desktop(&self) -> Option<String> {
		self.desktop.lock().clone()
	}

	/// Project list, recent prompts, then the focused desktop when known.
	pub fn snapshot(&self) -> Vec<ServerMessage> {
		let mut messages = vec![
			ServerMessage::Projects {
				data: self.store.views(),
			},
			ServerMessage::Prompts {
				data: self.prompts(),
			},
		];
		if let Some(desktop) = self.current_desktop() {
			messages.push(ServerMessage::CurrentDesktop { data: desktop });
		}
		messages
	}

	pub fn connect(&self) -> (u64, mpsc::Receiver<String>) {
		self.hub.connect(|| self.snapshot())
	}

	pub async fn apply(&self, event: WatchEvent) {
		match event {
			WatchEvent::Git {
				project,
				branch,
				summary,
			} => {
				let result = self
					.update(&project, |state| {
						if state.git_branch == branch && state.git_status_summary == summary {
							return false;
						}
						state.git_branch = branch;
						state.git_status_summary = summary;
						true
					})
					.await;
				if let Err(err) = result {
					debug!(event = "git_update_dropped", project = %project, error = %err);
				}
			}
			WatchEvent::AgentTabs { project, tabs } => {
				let _guard = self.store.lock(&project).await;
				let finished = {
					let mut states = self.tab_states.lock();
					let previous = states.entry(project.clone()).or_default();
					let finished = detection::finished_tabs(previous, &tabs);
					*previous = tabs.iter().map(|t| (t.tab_name.clone(), t.state)).collect();
					finished
				};
				self.store.set_agent_tabs(&project, tabs.clone());
				self.hub.broadcast(&ServerMessage::AgentTabs {
					project: project.clone(),
					data: tabs,
				});
				if !finished.is_empty() {
					info!(event = "agent_tab_finished", project = %project, tabs = ?finished);
					self.sink.play();
				}
			}
			WatchEvent::Prompt(entry) => {
				{
					let mut prompts = self.prompts.lock();
					prompts.push_front(entry.clone());
					prompts.truncate(self.prompt_limit);
				}
				self.hub.broadcast(&ServerMessage::Prompt { data: entry });
			}
			WatchEvent::Desktop(id) => {
				*self.desktop.lock() = Some(id.clone());
				self.hub.broadcast(&ServerMessage::CurrentDesktop { data: id });
			}
			WatchEvent::LiveTabs { project, titles } => {
				let _guard = self.store.lock(&project).await;
				self.store.set_live_titles(&project, titles.clone());
				self.hub.broadcast(&ServerMessage::LiveTabs {
					project,
					data: titles,
				});
			}
		}
	}

	/// Consumes watcher events until every sender is gone.
	pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<WatchEvent>) {
		while let Some(event) = events.recv().await {
			self.apply(event).await;
		}
		debug!(event = "engine_stopped");
	}

	pub fn forget(&self, name: &str) {
		self.tab_states.lock().remove(name);
	}
}
