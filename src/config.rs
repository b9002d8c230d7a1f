use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::ProjectConfig;

const DEFAULT_CONFIG: &str = r#"
version = 1
control_protocol = 1

[dashboard]
port = 7890
width = 380
height = 900
position = "right"

[defaults]
editor = "code"
home_desktop = "0"

[defaults.terminal]
emulator = ["x-terminal-emulator", "-e"]
shell = "zsh"
# tab opened for projects that configure none
default_tab = "claude"
default_command = "claude"

[desktop]
tool = "~/.agent-manager/tools/VirtualDesktop11.exe"
settle_delay_ms = 500
pin_title = "Agent Manager"
# argv run once per unpinned window on deactivation; "{hwnd}" is replaced
close_window = []

[notifications]
enabled = true
command = ["paplay", "/usr/share/sounds/freedesktop/stereo/complete.oga"]

[watchers]
git_interval_secs = 10
agent_status_interval_ms = 2000
desktop_interval_ms = 1000
terminal_tabs_interval_ms = 3000
stale_tab_secs = 60
prompt_buffer = 50
history_path = "~/.claude/history.jsonl"
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
	#[serde(default = "default_version")]
	pub version: u32,
	#[serde(default = "default_version")]
	pub control_protocol: u32,
	#[serde(default)]
	pub dashboard: Dashboard,
	#[serde(default)]
	pub defaults: Defaults,
	#[serde(default)]
	pub desktop: DesktopSettings,
	#[serde(default)]
	pub notifications: Notifications,
	#[serde(default)]
	pub watchers: WatcherSettings,
	#[serde(default)]
	pub projects: Vec<ProjectConfig>,
}

fn default_version() -> u32 {
	1
}

impl Default for GlobalConfig {
	fn default() -> Self {
		Self {
			version: 1,
			control_protocol: 1,
			dashboard: Dashboard::default(),
			defaults: Defaults::default(),
			desktop: DesktopSettings::default(),
			notifications: Notifications::default(),
			watchers: WatcherSettings::default(),
			projects: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Dashboard {
	pub port: u16,
	pub width: u32,
	pub height: u32,
	pub position: String, // "left" or "right"
}

impl Default for Dashboard {
	fn default() -> Self {
		Self {
			port: 7890,
			width: 380,
			height: 900,
			position: "right".to_string(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Defaults {
	pub editor: String,
	pub home_desktop: String,
	pub terminal: TerminalDefaults,
}

impl Default for Defaults {
	fn default() -> Self {
		Self {
			editor: "code".to_string(),
			home_desktop: "0".to_string(),
			terminal: TerminalDefaults::default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalDefaults {
	/// Emulator argv; the tmux attach command is appended to it.
	pub emulator: Vec<String>,
	pub shell: String,
	pub default_tab: String,
	/// Run in `default_tab`; empty leaves a bare shell.
	pub default_command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub profile: Option<String>,
}

impl Default for TerminalDefaults {
	fn default() -> Self {
		Self {
			emulator: vec!["x-terminal-emulator".to_string(), "-e".to_string()],
			shell: "zsh".to_string(),
			default_tab: "claude".to_string(),
			default_command: "claude".to_string(),
			profile: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DesktopSettings {
	pub tool: String,
	pub settle_delay_ms: u64,
	pub pin_title: String,
	pub close_window: Vec<String>,
}

impl Default for DesktopSettings {
	fn default() -> Self {
		Self {
			tool: "~/.agent-manager/tools/VirtualDesktop11.exe".to_string(),
			settle_delay_ms: 500,
			pin_title: "Agent Manager".to_string(),
			close_window: Vec::new(),
		}
	}
}

impl DesktopSettings {
	pub fn tool_path(&self) -> Option<PathBuf> {
		if self.tool.trim().is_empty() {
			return None;
		}
		Some(PathBuf::from(expand_path(&self.tool)))
	}

	pub fn settle_delay(&self) -> Duration {
		Duration::from_millis(self.settle_delay_ms)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Notifications {
	pub enabled: bool,
	pub command: Vec<String>,
}

impl Default for Notifications {
	fn default() -> Self {
		Self {
			enabled: true,
			command: vec![
				"paplay".to_string(),
				"/usr/share/sounds/freedesktop/stereo/complete.oga".to_string(),
			],
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatcherSettings {
	pub git_interval_secs: u64,
	pub agent_status_interval_ms: u64,
	pub desktop_interval_ms: u64,
	pub terminal_tabs_interval_ms: u64,
	pub stale_tab_secs: u64,
	pub prompt_buffer: usize,
	pub history_path: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub processing_title_pattern: Option<String>,
}

impl Default for WatcherSettings {
	fn default() -> Self {
		Self {
			git_interval_secs: 10,
			agent_status_interval_ms: 2000,
			desktop_interval_ms: 1000,
			terminal_tabs_interval_ms: 3000,
			stale_tab_secs: 60,
			prompt_buffer: 50,
			history_path: "~/.claude/history.jsonl".to_string(),
			processing_title_pattern: None,
		}
	}
}

impl WatcherSettings {
	pub fn history_path(&self) -> PathBuf {
		PathBuf::from(expand_path(&self.history_path))
	}
}

/// Where the global configuration comes from. The core reads through this and
/// only writes back when a project is registered or removed.
pub trait ConfigLoader: Send + Sync {
	fn load(&self) -> Result<GlobalConfig>;
	fn save(&self, config: &GlobalConfig) -> Result<()>;
}

pub struct TomlConfigLoader {
	path: PathBuf,
}

impl TomlConfigLoader {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn default_location() -> Result<Self> {
		Ok(Self::new(base_dir()?.join("config.toml")))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Writes the default file on first run, then parses it.
	pub fn load_or_init(&self) -> Result<GlobalConfig> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		if !self.path.exists() {
			fs::write(&self.path, DEFAULT_CONFIG.trim_start())
				.with_context(|| format!("failed to write default config {:?}", self.path))?;
		}
		let content = fs::read_to_string(&self.path)
			.with_context(|| format!("failed to read config {:?}", self.path))?;
		let cfg: GlobalConfig = toml::from_str(&content)
			.with_context(|| format!("failed to parse config {:?}", self.path))?;
		Ok(cfg)
	}
}

impl ConfigLoader for TomlConfigLoader {
	fn load(&self) -> Result<GlobalConfig> {
		self.load_or_init()
	}

	fn save(&self, config: &GlobalConfig) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let content = toml::to_string_pretty(config).context("failed to serialize config")?;
		fs::write(&self.path, content)
			.with_context(|| format!("failed to write config {:?}", self.path))
	}
}

pub fn expand_path(input: &str) -> String {
	if input.starts_with("~/") {
		if let Some(home) = dirs::home_dir() {
			return home
				.join(input.trim_start_matches("~/"))
				.to_string_lossy()
				.into_owned();
		}
	}
	input.to_string()
}

pub fn base_dir() -> Result<PathBuf> {
	dirs::home_dir()
		.map(|p| p.join(".agent-manager"))
		.ok_or_else(|| anyhow::anyhow!("Failed to resolve home directory"))
}

pub fn state_dir() -> Result<PathBuf> {
	let dir = base_dir()?.join("state");
	fs::create_dir_all(&dir)?;
	Ok(dir)
}

pub fn agent_project_dir(project_path: &str) -> PathBuf {
	Path::new(project_path).join(".agent-project")
}

pub fn agent_status_path(project_path: &str) -> PathBuf {
	agent_project_dir(project_path).join("status.json")
}

pub fn tasks_path(project_path: &str) -> PathBuf {
	agent_project_dir(project_path).join("tasks.json")
}

#[cfg(test)]
pub struct MemoryConfigLoader {
	config: parking_lot::Mutex<GlobalConfig>,
}

#[cfg(test)]
impl MemoryConfigLoader {
	pub fn new(config: GlobalConfig) -> Self {
		Self {
			config: parking_lot::Mutex::new(config),
		}
	}
}

#[cfg(test)]
impl ConfigLoader for MemoryConfigLoader {
	fn load(&self) -> Result<GlobalConfig> {
		Ok(self.config.lock().clone())
	}

	fn save(&self, config: &GlobalConfig) -> Result<()> {
		*self.config.lock() = config.clone();
		Ok(())
	}
}
