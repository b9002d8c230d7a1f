use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
	#[default]
	Dormant,
	Activating,
	Active,
}

impl ProjectStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			ProjectStatus::Dormant => "dormant",
			ProjectStatus::Activating => "activating",
			ProjectStatus::Active => "active",
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerminalTab {
	pub name: String,
	#[serde(default)]
	pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerminalConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub profile: Option<String>,
	#[serde(default)]
	pub tabs: Vec<TerminalTab>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
	pub name: String,
	pub path: String,
	#[serde(default)]
	pub description: String,
	#[serde(default = "default_color")]
	pub color: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub control_protocol: Option<u32>,
	#[serde(default)]
	pub terminal: TerminalConfig,
}

pub fn default_color() -> String {
	"#6366f1".to_string()
}

impl ProjectConfig {
	pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			path: path.into(),
			description: String::new(),
			color: default_color(),
			control_protocol: None,
			terminal: TerminalConfig::default(),
		}
	}
}

/// Runtime state of a project as clients see it.
///
/// `status` only ever lives in memory; see [`StateRecord`] for what reaches disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectState {
	pub status: ProjectStatus,
	pub last_activated: Option<DateTime<Utc>>,
	pub last_deactivated: Option<DateTime<Utc>>,
	pub desktop: Option<String>,
	pub window_handles: BTreeMap<String, u32>,
	pub state_description: String,
	pub git_branch: String,
	pub git_status_summary: String,
}

/// On-disk shape of [`ProjectState`]. Every field is optional on read so a
/// partially written file still yields the defaults for what is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateRecord {
	pub last_activated: Option<DateTime<Utc>>,
	pub last_deactivated: Option<DateTime<Utc>>,
	pub desktop: Option<String>,
	pub window_handles: BTreeMap<String, u32>,
	pub state_description: String,
	pub git_branch: String,
	pub git_status_summary: String,
}

impl StateRecord {
	pub fn into_state(self, status: ProjectStatus) -> ProjectState {
		ProjectState {
			status,
			last_activated: self.last_activated,
			last_deactivated: self.last_deactivated,
			desktop: self.desktop,
			window_handles: self.window_handles,
			state_description: self.state_description,
			git_branch: self.git_branch,
			git_status_summary: self.git_status_summary,
		}
	}
}

impl From<&ProjectState> for StateRecord {
	fn from(state: &ProjectState) -> Self {
		Self {
			last_activated: state.last_activated,
			last_deactivated: state.last_deactivated,
			desktop: state.desktop.clone(),
			window_handles: state.window_handles.clone(),
			state_description: state.state_description.clone(),
			git_branch: state.git_branch.clone(),
			git_status_summary: state.git_status_summary.clone(),
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TabState {
	Processing,
	Idle,
	Inactive,
}

/// One tab entry of `.agent-project/status.json`, written by agent hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentTab {
	pub tab_name: String,
	pub state: TabState,
	#[serde(default)]
	pub last_prompt: String,
	pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStatusFile {
	#[serde(default)]
	pub tabs: Vec<AgentTab>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptEntry {
	pub timestamp: i64,
	pub project: String,
	pub text: String,
}

/// Transient per-project view of running sessions. Replaced wholesale on
/// every watcher tick, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveTabs {
	pub titles: Vec<String>,
	pub agent_tabs: Vec<AgentTab>,
}

/// Externally visible projection: config, state and live tabs combined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectView {
	pub name: String,
	pub config: ProjectConfig,
	pub state: ProjectState,
	pub live_tabs: Vec<String>,
	pub agent_tabs: Vec<AgentTab>,
}
