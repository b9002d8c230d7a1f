use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::model::ProjectView;
use crate::protocol::{DeactivateRequest, ErrorBody, TransitionResponse};

/// Talks to a running server for the remote CLI commands.
pub struct ApiClient {
	base: String,
	http: reqwest::Client,
}

impl ApiClient {
	pub fn new(port: u16) -> Result<Self> {
		// Activation waits on the desktop settle delay and terminal startup.
		let http = reqwest::Client::builder()
			.user_agent("agent-manager-cli")
			.timeout(Duration::from_secs(30))
			.build()?;
		Ok(Self {
			base: format!("http://127.0.0.1:{}", port),
			http,
		})
	}

	async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
		let status = response.status();
		if !status.is_success() {
			let message = match response.json::<ErrorBody>().await {
				Ok(body) => body.error,
				Err(_) => status.to_string(),
			};
			bail!("{} ({})", message, status);
		}
		response.json().await.context("unexpected response from server")
	}

	pub async fn projects(&self) -> Result<Vec<ProjectView>> {
		let response = self
			.http
			.get(format!("{}/api/projects", self.base))
			.send()
			.await
			.with_context(|| format!("is the server running at {}?", self.base))?;
		Self::read(response).await
	}

	async fn transition(&self, name: &str, action: &str, body: Option<DeactivateRequest>) -> Result<TransitionResponse> {
		let mut request = self
			.http
			.post(format!("{}/api/projects/{}/{}", self.base, name, action));
		if let Some(body) = body {
			request = request.json(&body);
		}
		let response = request
			.send()
			.await
			.with_context(|| format!("is the server running at {}?", self.base))?;
		Self::read(response).await
	}

	pub async fn activate(&self, name: &str) -> Result<TransitionResponse> {
		self.transition(name, "activate", None).await
	}

	pub async fn deactivate(&self, name: &str, note: Option<String>) -> Result<TransitionResponse> {
		let body = DeactivateRequest {
			state_description: note,
		};
		self.transition(name, "deactivate", Some(body)).await
	}

	pub async fn switch(&self, name: &str) -> Result<TransitionResponse> {
		self.transition(name, "switch", None).await
	}
}

pub fn format_status(projects: &[ProjectView]) -> String {
	let width = projects.iter().map(|p| p.name.len()).max().unwrap_or(0);
	let mut out = String::new();
	for project in projects {
		let state = &project.state;
		let mut line = format!("{:<width$}  {:<10}", project.name, state.status.as_str(), width = width);
		if !state.git_branch.is_empty() {
			line.push_str(&format!("  {} [{}]", state.git_branch, state.git_status_summary));
		}
		if !project.live_tabs.is_empty() {
			line.push_str(&format!("  busy: {}", project.live_tabs.len()));
		}
		if !state.state_description.is_empty() {
			line.push_str(&format!("  \"{}\"", state.state_description));
		}
		out.push_str(line.trim_end());
		out.push('\n');
	}
	out
}
