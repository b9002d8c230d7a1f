//! HTTP command surface and the `/ws` subscription endpoint.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::activation::{Activator, Transition};
use crate::engine::Engine;
use crate::error::ManagerError;
use crate::model::{ProjectConfig, ProjectView};
use crate::protocol::{
	DeactivateRequest, ErrorBody, RegisterRequest, StatePatch, TaskList, TaskRequest,
	TransitionResponse,
};
use crate::store::EntityStore;
use crate::watchers::{agent_status, WatcherSet};

static WSL_UNC: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?i)^\\\\wsl[.$\\].*?\\[^\\]+\\(.*)$").unwrap());

#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<Engine>,
	pub activator: Arc<Activator>,
	pub watchers: Arc<WatcherSet>,
}

impl AppState {
	fn store(&self) -> &Arc<EntityStore> {
		self.engine.store()
	}
}

#[derive(Debug)]
pub struct ApiError(ManagerError);

impl From<ManagerError> for ApiError {
	fn from(err: ManagerError) -> Self {
		Self(err)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = match &self.0 {
			ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
			ManagerError::Validation(_) => StatusCode::BAD_REQUEST,
			ManagerError::Conflict(_) => StatusCode::CONFLICT,
			ManagerError::Io(_) | ManagerError::Internal(_) => {
				error!(event = "request_failed", error = %self.0);
				StatusCode::INTERNAL_SERVER_ERROR
			}
		};
		let body = Json(ErrorBody {
			error: self.0.to_string(),
		});
		(status, body).into_response()
	}
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/api/config", get(get_config))
		.route("/api/projects", get(list_projects).post(register_project))
		.route("/api/projects/:name", get(get_project).delete(delete_project))
		.route("/api/projects/:name/activate", post(activate))
		.route("/api/projects/:name/deactivate", post(deactivate))
		.route("/api/projects/:name/switch", post(switch))
		.route("/api/projects/:name/state", patch(patch_state))
		.route(
			"/api/projects/:name/tasks",
			get(list_tasks).post(add_task).put(replace_tasks),
		)
		.route("/api/projects/:name/tasks/:index", delete(remove_task))
		.route("/api/desktop/home", post(desktop_home))
		.route("/ws", get(ws_upgrade))
		.with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
	Json(json!({
		"status": "ok",
		"clients": state.engine.hub().client_count(),
	}))
}

async fn get_config(State(state): State<AppState>) -> Json<Value> {
	let cfg = state.store().config();
	Json(json!({
		"dashboard": cfg.dashboard,
		"controlProtocol": cfg.control_protocol,
	}))
}

async fn list_projects(State(state): State<AppState>) -> Json<Vec<ProjectView>> {
	Json(state.store().views())
}

async fn get_project(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> ApiResult<Json<ProjectView>> {
	Ok(Json(state.store().view(&name)?))
}

/// `\\wsl.localhost\<distro>\home\me\code` → `/home/me/code`.
pub fn normalize_project_path(raw: &str) -> String {
	let trimmed = raw.trim();
	match WSL_UNC.captures(trimmed).and_then(|c| c.get(1)) {
		Some(rest) => format!("/{}", rest.as_str().replace('\\', "/")),
		None => trimmed.to_string(),
	}
}

async fn register_project(
	State(state): State<AppState>,
	Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<ProjectView>)> {
	if req.path.trim().is_empty() {
		return Err(ManagerError::validation("path is required").into());
	}
	let path = normalize_project_path(&req.path);
	if !std::path::Path::new(&path).exists() {
		return Err(ManagerError::validation(format!("Path does not exist: {}", path)).into());
	}
	let name = match req.name.as_deref().map(str::trim) {
		Some(name) if !name.is_empty() => name.to_string(),
		_ => std::path::Path::new(&path)
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_default(),
	};

	let mut project = ProjectConfig::new(name.clone(), path);
	if let Some(description) = req.description {
		project.description = description;
	}
	if let Some(color) = req.color.filter(|c| !c.trim().is_empty()) {
		project.color = color;
	}
	state.store().register(project.clone())?;
	info!(event = "project_registered", project = %name, path = %project.path);

	agent_status::spawn_for(&state.watchers, &project, &state.store().config().watchers);
	state.engine.publish_projects();
	Ok((StatusCode::CREATED, Json(state.store().view(&name)?)))
}

async fn delete_project(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
	state.store().remove(&name)?;
	state.watchers.stop(&agent_status::watcher_name(&name));
	state.engine.forget(&name);
	info!(event = "project_removed", project = %name);
	state.engine.publish_projects();
	Ok(Json(json!({ "ok": true })))
}

fn transition_response(transition: Transition) -> Json<TransitionResponse> {
	Json(TransitionResponse {
		ok: true,
		project: transition.view,
		warnings: transition.warnings,
	})
}

async fn activate(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> ApiResult<Json<TransitionResponse>> {
	Ok(transition_response(state.activator.activate(&name).await?))
}

async fn deactivate(
	State(state): State<AppState>,
	Path(name): Path<String>,
	body: Option<Json<DeactivateRequest>>,
) -> ApiResult<Json<TransitionResponse>> {
	let description = body.and_then(|Json(req)| req.state_description);
	Ok(transition_response(state.activator.deactivate(&name, description).await?))
}

async fn switch(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> ApiResult<Json<TransitionResponse>> {
	Ok(transition_response(state.activator.switch(&name).await?))
}

async fn patch_state(
	State(state): State<AppState>,
	Path(name): Path<String>,
	Json(patch): Json<StatePatch>,
) -> ApiResult<Json<ProjectView>> {
	Ok(Json(state.activator.patch_state(&name, patch).await?))
}

async fn list_tasks(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
	Ok(Json(state.store().tasks(&name)?))
}

async fn add_task(
	State(state): State<AppState>,
	Path(name): Path<String>,
	Json(req): Json<TaskRequest>,
) -> ApiResult<Json<Vec<String>>> {
	let task = req.task.trim().to_string();
	if task.is_empty() {
		return Err(ManagerError::validation("task is required").into());
	}
	let tasks = state
		.engine
		.update_tasks(&name, |tasks| {
			tasks.push(task);
			Ok(())
		})
		.await?;
	Ok(Json(tasks))
}

async fn replace_tasks(
	State(state): State<AppState>,
	Path(name): Path<String>,
	Json(replacement): Json<TaskList>,
) -> ApiResult<Json<Vec<String>>> {
	let tasks = state
		.engine
		.update_tasks(&name, |tasks| {
			*tasks = replacement.tasks;
			Ok(())
		})
		.await?;
	Ok(Json(tasks))
}

async fn remove_task(
	State(state): State<AppState>,
	Path((name, index)): Path<(String, usize)>,
) -> ApiResult<Json<Vec<String>>> {
	let tasks = state
		.engine
		.update_tasks(&name, |tasks| {
			if index >= tasks.len() {
				return Err(ManagerError::validation("Invalid index"));
			}
			tasks.remove(index);
			Ok(())
		})
		.await?;
	Ok(Json(tasks))
}

async fn desktop_home(State(state): State<AppState>) -> Json<Value> {
	let warnings = state.activator.go_home().await;
	Json(json!({ "ok": true, "warnings": warnings }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
	ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<Engine>) {
	let (mut sink, mut stream) = socket.split();
	let (conn_id, mut outbound) = engine.connect();

	let mut writer = tokio::spawn(async move {
		while let Some(text) = outbound.recv().await {
			if sink.send(Message::Text(text)).await.is_err() {
				return;
			}
		}
		let _ = sink.send(Message::Close(None)).await;
	});
	// Clients never send commands over the socket; reading only notices
	// the close.
	let mut reader = tokio::spawn(async move {
		while let Some(Ok(msg)) = stream.next().await {
			if let Message::Close(_) = msg {
				break;
			}
		}
	});

	tokio::select! {
		_ = &mut writer => reader.abort(),
		_ = &mut reader => writer.abort(),
	}
	engine.hub().disconnect(conn_id);
	debug!(event = "socket_closed", conn_id);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::tests::{drain, engine_with};
	use crate::watchers::desktop::tests::FakeDesktop;
	use crate::watchers::tabs::tests::FakeTerminal;
	use std::time::Duration;
	use tempfile::TempDir;
	use tokio::sync::mpsc;

	fn app(projects: Vec<ProjectConfig>) -> (TempDir, AppState) {
		let (temp, engine, _sink) = engine_with(projects);
		let activator = Activator::new(
			engine.clone(),
			Arc::new(FakeDesktop::default()),
			Arc::new(FakeTerminal::default()),
			Duration::ZERO,
			"0",
		);
		let (tx, _rx) = mpsc::channel(8);
		let state = AppState {
			engine,
			activator: Arc::new(activator),
			watchers: Arc::new(WatcherSet::new(tx)),
		};
		(temp, state)
	}

	#[test]
	fn test_wsl_unc_paths_become_linux_paths() {
		assert_eq!(
			normalize_project_path(r"\\wsl.localhost\Ubuntu-24.04\home\me\code"),
			"/home/me/code"
		);
		assert_eq!(normalize_project_path(r"\\wsl$\Ubuntu\srv\app"), "/srv/app");
		assert_eq!(normalize_project_path("  /home/me/code "), "/home/me/code");
	}

	#[tokio::test]
	async fn test_register_validates_before_mutating() {
		let (temp, state) = app(vec![]);

		let missing = register_project(State(state.clone()), Json(RegisterRequest::default())).await;
		assert_eq!(missing.err().unwrap().into_response().status(), StatusCode::BAD_REQUEST);

		let bogus = RegisterRequest {
			path: temp.path().join("nope").to_string_lossy().into_owned(),
			..RegisterRequest::default()
		};
		let bogus = register_project(State(state.clone()), Json(bogus)).await;
		assert_eq!(bogus.err().unwrap().into_response().status(), StatusCode::BAD_REQUEST);
		assert!(state.store().list().is_empty());
	}

	#[tokio::test]
	async fn test_register_names_from_basename_and_rejects_duplicates() {
		let (temp, state) = app(vec![]);
		let dir = temp.path().join("parser");
		std::fs::create_dir_all(&dir).unwrap();
		let (_id, mut rx) = state.engine.connect();
		drain(&mut rx);

		let req = RegisterRequest {
			path: dir.to_string_lossy().into_owned(),
			..RegisterRequest::default()
		};
		let (status, Json(view)) = register_project(State(state.clone()), Json(req.clone()))
			.await
			.ok()
			.unwrap();
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(view.name, "parser");
		assert_eq!(view.config.color, "#6366f1");
		assert_eq!(drain(&mut rx)[0]["type"], "projects");
		assert_eq!(state.watchers.names(), vec!["agent-status:parser"]);

		let again = register_project(State(state.clone()), Json(req)).await;
		assert_eq!(again.err().unwrap().into_response().status(), StatusCode::CONFLICT);
		state.watchers.shutdown();
	}

	#[tokio::test]
	async fn test_unknown_project_is_404() {
		let (_temp, state) = app(vec![]);
		let res = get_project(State(state.clone()), Path("ghost".to_string())).await;
		assert_eq!(res.err().unwrap().into_response().status(), StatusCode::NOT_FOUND);
		let res = activate(State(state), Path("ghost".to_string())).await;
		assert_eq!(res.err().unwrap().into_response().status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn test_task_endpoints_edit_and_broadcast() {
		let temp = TempDir::new().unwrap();
		let (_state_dir, state) = app(vec![ProjectConfig::new(
			"web",
			temp.path().to_string_lossy(),
		)]);
		let (_id, mut rx) = state.engine.connect();
		drain(&mut rx);
		let path = || Path("web".to_string());

		let blank = add_task(State(state.clone()), path(), Json(TaskRequest { task: "  ".into() })).await;
		assert_eq!(blank.err().unwrap().into_response().status(), StatusCode::BAD_REQUEST);

		for task in ["write docs", " ship it "] {
			add_task(State(state.clone()), path(), Json(TaskRequest { task: task.into() }))
				.await
				.ok()
				.unwrap();
		}
		let Json(tasks) = list_tasks(State(state.clone()), path()).await.ok().unwrap();
		assert_eq!(tasks, vec!["write docs", "ship it"]);

		let out_of_range = remove_task(State(state.clone()), Path(("web".to_string(), 5))).await;
		assert_eq!(out_of_range.err().unwrap().into_response().status(), StatusCode::BAD_REQUEST);

		let Json(tasks) = remove_task(State(state.clone()), Path(("web".to_string(), 0)))
			.await
			.ok()
			.unwrap();
		assert_eq!(tasks, vec!["ship it"]);

		let body: TaskList = serde_json::from_str(r#"{"tasks": ["a", "b"]}"#).unwrap();
		let Json(tasks) = replace_tasks(State(state.clone()), path(), Json(body))
			.await
			.ok()
			.unwrap();
		assert_eq!(tasks, vec!["a", "b"]);
		assert!(serde_json::from_str::<TaskList>(r#"["a", "b"]"#).is_err());
		assert!(serde_json::from_str::<TaskList>("{}").is_err());

		let messages = drain(&mut rx);
		assert_eq!(messages.len(), 4);
		assert!(messages.iter().all(|m| m["type"] == "tasks" && m["project"] == "web"));
	}

	#[tokio::test]
	async fn test_deactivate_without_body_keeps_description() {
		let (_temp, state) = app(vec![ProjectConfig::new("web", "/src/web")]);
		activate(State(state.clone()), Path("web".to_string())).await.ok().unwrap();
		patch_state(
			State(state.clone()),
			Path("web".to_string()),
			Json(StatePatch {
				state_description: Some("stuck on flaky test".to_string()),
			}),
		)
		.await
		.ok()
		.unwrap();

		let Json(res) = deactivate(State(state.clone()), Path("web".to_string()), None)
			.await
			.ok()
			.unwrap();
		assert!(res.ok);
		assert_eq!(res.project.state.state_description, "stuck on flaky test");
	}

	#[tokio::test]
	async fn test_delete_refuses_active_projects() {
		let (_temp, state) = app(vec![ProjectConfig::new("web", "/src/web")]);
		activate(State(state.clone()), Path("web".to_string())).await.ok().unwrap();
		let res = delete_project(State(state.clone()), Path("web".to_string())).await;
		assert_eq!(res.err().unwrap().into_response().status(), StatusCode::CONFLICT);

		deactivate(State(state.clone()), Path("web".to_string()), None).await.ok().unwrap();
		delete_project(State(state.clone()), Path("web".to_string())).await.ok().unwrap();
		assert!(state.store().list().is_empty());
	}
}
