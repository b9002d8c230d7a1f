mod activation;
mod api;
mod client;
mod config;
mod desktop;
mod detection;
mod engine;
mod error;
mod exec;
mod git;
mod hub;
mod model;
mod protocol;
mod sound;
mod store;
mod tmux;
mod watchers;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use activation::Activator;
use client::ApiClient;
use config::{ConfigLoader, GlobalConfig, TomlConfigLoader};
use desktop::{DesktopController, VirtualDesktopTool};
use detection::TitlePredicate;
use engine::Engine;
use git::GitCli;
use hub::{Hub, CLIENT_QUEUE};
use protocol::TransitionResponse;
use sound::SoundCommand;
use store::EntityStore;
use tmux::{TerminalLauncher, TmuxLauncher};
use watchers::{
	agent_status, desktop::DesktopWatcher, git::GitWatcher, prompts::PromptWatcher,
	tabs::TerminalTabsWatcher, Watcher, WatcherSet,
};

const EVENT_QUEUE: usize = 1024;
const PROMPT_POLL: Duration = Duration::from_secs(1);
const PIN_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "agent-manager")]
#[command(about = "Keeps local dev projects dormant or active and streams their state")]
struct Cli {
	/// Verbose logging (overrides RUST_LOG)
	#[arg(long, global = true, default_value_t = false)]
	debug: bool,
	/// Config file (defaults to ~/.agent-manager/config.toml)
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// Server port (defaults to dashboard.port)
	#[arg(long, global = true)]
	port: Option<u16>,
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the state server (default)
	Serve,
	/// Print every project as reported by the running server
	Status {
		/// Print raw JSON
		#[arg(long, default_value_t = false)]
		json: bool,
	},
	/// Bring a dormant project up
	Activate { name: String },
	/// Tear an active project down
	Deactivate {
		name: String,
		/// Where you left off
		#[arg(long)]
		note: Option<String>,
	},
	/// Focus an active project's desktop
	Switch { name: String },
}

fn init_logging(debug: bool) {
	let level = if debug {
		"debug".to_string()
	} else {
		std::env::var("AGENT_MANAGER_LOG").unwrap_or_else(|_| "info".to_string())
	};
	let filter = if debug {
		EnvFilter::new(level)
	} else {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
	};
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn config_loader(path: Option<PathBuf>) -> Result<TomlConfigLoader> {
	match path {
		Some(path) => Ok(TomlConfigLoader::new(path)),
		None => TomlConfigLoader::default_location(),
	}
}

fn load_config(loader: &TomlConfigLoader) -> GlobalConfig {
	match loader.load() {
		Ok(cfg) => cfg,
		Err(err) => {
			warn!(event = "config_invalid", path = ?loader.path(), error = %format!("{:#}", err));
			GlobalConfig::default()
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(cli.debug);
	let loader = config_loader(cli.config)?;
	let remote = |loader: &TomlConfigLoader| {
		ApiClient::new(cli.port.unwrap_or_else(|| load_config(loader).dashboard.port))
	};

	match cli.command.unwrap_or(Commands::Serve) {
		Commands::Serve => serve(loader, cli.port).await,
		Commands::Status { json } => {
			let projects = remote(&loader)?.projects().await?;
			if json {
				println!("{}", serde_json::to_string_pretty(&projects)?);
			} else {
				print!("{}", client::format_status(&projects));
			}
			Ok(())
		}
		Commands::Activate { name } => report(remote(&loader)?.activate(&name).await?),
		Commands::Deactivate { name, note } => {
			report(remote(&loader)?.deactivate(&name, note).await?)
		}
		Commands::Switch { name } => report(remote(&loader)?.switch(&name).await?),
	}
}

fn report(outcome: TransitionResponse) -> Result<()> {
	println!("{}: {}", outcome.project.name, outcome.project.state.status.as_str());
	for warning in outcome.warnings {
		eprintln!("warning: {}", warning);
	}
	Ok(())
}

async fn serve(loader: TomlConfigLoader, port: Option<u16>) -> Result<()> {
	let cfg = load_config(&loader);
	let port = port.unwrap_or(cfg.dashboard.port);
	let settings = cfg.watchers.clone();
	info!(event = "config_loaded", path = ?loader.path(), projects = cfg.projects.len());

	let store = Arc::new(EntityStore::new(
		Box::new(loader),
		cfg.clone(),
		config::state_dir()?,
	));
	let hub = Arc::new(Hub::new(CLIENT_QUEUE));
	let sink = Arc::new(SoundCommand::new(cfg.notifications.clone()));
	let engine = Arc::new(Engine::new(
		store.clone(),
		hub.clone(),
		sink.clone(),
		settings.prompt_buffer,
	));
	let desktop: Arc<dyn DesktopController> = Arc::new(VirtualDesktopTool::new(&cfg.desktop));
	let terminal: Arc<dyn TerminalLauncher> =
		Arc::new(TmuxLauncher::new(cfg.defaults.terminal.clone()));
	let activator = Arc::new(Activator::new(
		engine.clone(),
		desktop.clone(),
		terminal.clone(),
		cfg.desktop.settle_delay(),
		cfg.defaults.home_desktop.clone(),
	));

	let history = settings.history_path();
	engine.seed_prompts(watchers::prompts::load_recent_prompts(
		&history,
		settings.prompt_buffer,
		&store,
	));

	let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
	let watchers = Arc::new(WatcherSet::new(events_tx));
	{
		let store = store.clone();
		let interval = Duration::from_secs(settings.git_interval_secs);
		watchers.spawn(
			"git",
			Arc::new(move || {
				Box::new(GitWatcher::new(store.clone(), Arc::new(GitCli::new()), interval))
					as Box<dyn Watcher>
			}),
		);
	}
	{
		let desktop = desktop.clone();
		let interval = Duration::from_millis(settings.desktop_interval_ms);
		watchers.spawn(
			"desktop",
			Arc::new(move || Box::new(DesktopWatcher::new(desktop.clone(), interval)) as Box<dyn Watcher>),
		);
	}
	{
		let predicate = match TitlePredicate::new(settings.processing_title_pattern.as_deref()) {
			Ok(predicate) => predicate,
			Err(err) => {
				warn!(event = "title_pattern_invalid", error = %format!("{:#}", err));
				TitlePredicate::default()
			}
		};
		let store = store.clone();
		let terminal = terminal.clone();
		let sink = sink.clone();
		let interval = Duration::from_millis(settings.terminal_tabs_interval_ms);
		watchers.spawn(
			"terminal-tabs",
			Arc::new(move || {
				Box::new(TerminalTabsWatcher::new(
					store.clone(),
					terminal.clone(),
					predicate.clone(),
					sink.clone(),
					interval,
				)) as Box<dyn Watcher>
			}),
		);
	}
	{
		let store = store.clone();
		let history = history.clone();
		watchers.spawn(
			"prompts",
			Arc::new(move || {
				Box::new(PromptWatcher::new(history.clone(), store.clone(), PROMPT_POLL))
					as Box<dyn Watcher>
			}),
		);
	}
	for project in store.list() {
		agent_status::spawn_for(&watchers, &project, &settings);
	}
	let engine_task = tokio::spawn(engine.clone().run(events_rx));

	let pin_title = cfg.desktop.pin_title.clone();
	if !pin_title.is_empty() {
		let desktop = desktop.clone();
		tokio::spawn(async move {
			tokio::time::sleep(PIN_DELAY).await;
			if let Err(err) = desktop.pin(&pin_title).await {
				warn!(event = "pin_failed", title = %pin_title, error = %err);
			}
		});
	}

	let state = api::AppState {
		engine: engine.clone(),
		activator,
		watchers: watchers.clone(),
	};
	let addr = SocketAddr::from(([127, 0, 0, 1], port));
	let listener = tokio::net::TcpListener::bind(addr)
		.await
		.with_context(|| format!("failed to bind {}", addr))?;
	info!(event = "listening", addr = %addr, watchers = ?watchers.names());

	axum::serve(listener, api::router(state))
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("server error")?;

	watchers.shutdown();
	engine_task.abort();
	hub.close_all();
	info!(event = "stopped");
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = tokio::signal::ctrl_c().await {
			warn!(event = "signal_handler_failed", error = %err);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(err) => {
				warn!(event = "signal_handler_failed", error = %err);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
	info!(event = "shutdown_requested");
}
