//! Wire shapes shared by the server, its WebSocket clients and the CLI.

use serde::{Deserialize, Serialize};

use crate::model::{AgentTab, ProjectView, PromptEntry};

/// Pushed to subscribers, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	Projects { data: Vec<ProjectView> },
	ProjectUpdate { data: ProjectView },
	Prompt { data: PromptEntry },
	/// Newest first.
	Prompts { data: Vec<PromptEntry> },
	LiveTabs { project: String, data: Vec<String> },
	AgentTabs { project: String, data: Vec<AgentTab> },
	CurrentDesktop { data: String },
	Tasks { project: String, data: Vec<String> },
}

impl ServerMessage {
	pub fn kind(&self) -> &'static str {
		match self {
			ServerMessage::Projects { .. } => "projects",
			ServerMessage::ProjectUpdate { .. } => "project_update",
			ServerMessage::Prompt { .. } => "prompt",
			ServerMessage::Prompts { .. } => "prompts",
			ServerMessage::LiveTabs { .. } => "live_tabs",
			ServerMessage::AgentTabs { .. } => "agent_tabs",
			ServerMessage::CurrentDesktop { .. } => "current_desktop",
			ServerMessage::Tasks { .. } => "tasks",
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
	#[serde(default)]
	pub path: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeactivateRequest {
	#[serde(default, alias = "description")]
	pub state_description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePatch {
	#[serde(default)]
	pub state_description: Option<String>,
}

impl StatePatch {
	pub fn is_empty(&self) -> bool {
		self.state_description.is_none()
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
	#[serde(default)]
	pub task: String,
}

/// Body of `PUT /api/projects/:name/tasks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskList {
	pub tasks: Vec<String>,
}

/// Result of an activation, deactivation or switch. `warnings` lists the
/// collaborator steps that degraded without failing the transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
	pub ok: bool,
	pub project: ProjectView,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
	pub error: String,
}
