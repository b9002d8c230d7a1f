use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::{Command as StdCommand, Stdio};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::TerminalDefaults;
use crate::exec;
use crate::model::{TerminalConfig, TerminalTab};

pub const SESSION_PREFIX: &str = "am-";

const TMUX_TIMEOUT: Duration = Duration::from_secs(5);
const HANDLE_ATTEMPTS: usize = 10;
const HANDLE_POLL: Duration = Duration::from_millis(500);

/// Common tmux installation paths
const TMUX_PATHS: &[&str] = &[
	"/usr/bin/tmux",
	"/usr/local/bin/tmux",
	"/opt/homebrew/bin/tmux",
	"/bin/tmux",
];

/// Cached tmux path - found once at startup
static TMUX_PATH: OnceLock<String> = OnceLock::new();

/// Find tmux binary, checking common locations if not in PATH
pub fn find_tmux() -> &'static str {
	TMUX_PATH.get_or_init(|| {
		if let Ok(output) = StdCommand::new("which").arg("tmux").output() {
			if output.status.success() {
				let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
				if !path.is_empty() && Path::new(&path).exists() {
					return path;
				}
			}
		}

		for path in TMUX_PATHS {
			if Path::new(path).exists() {
				return path.to_string();
			}
		}

		"tmux".to_string()
	})
}

fn tmux_cmd() -> Command {
	Command::new(find_tmux())
}

/// Terminal sessions that belong to a project's desktop.
#[async_trait]
pub trait TerminalLauncher: Send + Sync {
	/// Opens one tab per configured tab and returns a handle to the visible
	/// terminal when one could be found.
	async fn launch(&self, name: &str, path: &str, terminal: &TerminalConfig) -> Result<Option<u32>>;
	async fn close(&self, name: &str) -> Result<()>;
	async fn tab_titles(&self, name: &str) -> Result<Vec<String>>;
}

/// One tmux session per project, one window per tab, attached from a
/// terminal emulator.
pub struct TmuxLauncher {
	defaults: TerminalDefaults,
}

impl TmuxLauncher {
	pub fn new(defaults: TerminalDefaults) -> Self {
		Self { defaults }
	}

	async fn tmux(&self, args: &[&str]) -> Result<String> {
		let mut cmd = tmux_cmd();
		cmd.args(args);
		exec::stdout(cmd, TMUX_TIMEOUT).await
	}

	async fn has_session(&self, session: &str) -> bool {
		self.tmux(&["has-session", "-t", session]).await.is_ok()
	}

	async fn send_keys(&self, target: &str, text: &str) -> Result<()> {
		// Literal first so the command text is not read as key names.
		self.tmux(&["send-keys", "-l", "-t", target, text]).await?;
		self.tmux(&["send-keys", "-t", target, "Enter"]).await?;
		Ok(())
	}

	async fn open_tab(&self, session: &str, path: &str, tab: &TerminalTab, first: bool) -> Result<()> {
		if first {
			self.tmux(&[
				"new-session", "-d", "-s", session, "-n", &tab.name, "-c", path, &self.defaults.shell,
			])
			.await?;
		} else {
			self.tmux(&[
				"new-window", "-t", session, "-n", &tab.name, "-c", path, &self.defaults.shell,
			])
			.await?;
		}
		if !tab.command.trim().is_empty() {
			let target = format!("{}:{}", session, tab.name);
			self.send_keys(&target, &tab.command).await?;
		}
		Ok(())
	}

	async fn client_pid(&self, session: &str) -> Option<u32> {
		for _ in 0..HANDLE_ATTEMPTS {
			tokio::time::sleep(HANDLE_POLL).await;
			if let Ok(out) = self.tmux(&["list-clients", "-t", session, "-F", "#{client_pid}"]).await {
				if let Some(pid) = out.lines().find_map(|l| l.trim().parse::<u32>().ok()) {
					return Some(pid);
				}
			}
		}
		None
	}
}

#[async_trait]
impl TerminalLauncher for TmuxLauncher {
	async fn launch(&self, name: &str, path: &str, terminal: &TerminalConfig) -> Result<Option<u32>> {
		let session = session_name(name);
		if self.has_session(&session).await {
			debug!(event = "tmux_session_reused", session = %session);
		} else {
			let tabs = tabs_or_default(terminal, &self.defaults);
			for (i, tab) in tabs.iter().enumerate() {
				self.open_tab(&session, path, tab, i == 0).await?;
			}
			info!(event = "tmux_session_started", session = %session, tabs = tabs.len());
		}

		let profile = terminal.profile.as_deref().or(self.defaults.profile.as_deref());
		let argv = emulator_argv(&self.defaults.emulator, name, profile, find_tmux(), &session);
		let Some((program, args)) = argv.split_first() else {
			bail!("no terminal emulator configured");
		};
		Command::new(program)
			.args(args)
			.current_dir(path)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.spawn()?;

		let pid = self.client_pid(&session).await;
		if pid.is_none() {
			warn!(event = "terminal_handle_unknown", project = name, session = %session);
		}
		Ok(pid)
	}

	async fn close(&self, name: &str) -> Result<()> {
		let session = session_name(name);
		if !self.has_session(&session).await {
			return Ok(());
		}
		self.tmux(&["kill-session", "-t", &session]).await?;
		info!(event = "tmux_session_closed", session = %session);
		Ok(())
	}

	async fn tab_titles(&self, name: &str) -> Result<Vec<String>> {
		let session = session_name(name);
		if !self.has_session(&session).await {
			return Ok(Vec::new());
		}
		let out = self.tmux(&["list-windows", "-t", &session, "-F", "#{pane_title}"]).await?;
		Ok(out
			.lines()
			.map(|l| l.trim().to_string())
			.filter(|l| !l.is_empty())
			.collect())
	}
}

pub fn session_name(name: &str) -> String {
	format!("{}{}", SESSION_PREFIX, slug::slugify(name))
}

fn tabs_or_default(terminal: &TerminalConfig, defaults: &TerminalDefaults) -> Vec<TerminalTab> {
	if terminal.tabs.is_empty() {
		let name = match defaults.default_tab.trim() {
			"" => "shell",
			name => name,
		};
		vec![TerminalTab {
			name: name.to_string(),
			command: defaults.default_command.clone(),
		}]
	} else {
		terminal.tabs.clone()
	}
}

/// Expands `{title}` and `{profile}` in the emulator argv and appends the
/// attach command. Arguments naming `{profile}` are dropped when no profile
/// is set, together with a preceding `--profile`-style flag.
pub fn emulator_argv(
	emulator: &[String],
	title: &str,
	profile: Option<&str>,
	tmux: &str,
	session: &str,
) -> Vec<String> {
	let mut argv: Vec<String> = Vec::with_capacity(emulator.len() + 4);
	for arg in emulator {
		if arg.contains("{profile}") {
			match profile {
				Some(profile) => argv.push(arg.replace("{profile}", profile)),
				None => {
					if argv.last().is_some_and(|prev| prev.starts_with('-')) && !arg.starts_with('-') {
						argv.pop();
					}
				}
			}
			continue;
		}
		argv.push(arg.replace("{title}", title));
	}
	argv.extend([
		tmux.to_string(),
		"attach-session".to_string(),
		"-t".to_string(),
		session.to_string(),
	]);
	argv
}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(items: &[&str]) -> Vec<String> {
		items.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn test_session_names_are_slugged() {
		assert_eq!(session_name("My Web App!"), "am-my-web-app");
		assert_eq!(session_name("api"), "am-api");
	}

	#[test]
	fn test_empty_tab_list_runs_default_command() {
		let tabs = tabs_or_default(&TerminalConfig::default(), &TerminalDefaults::default());
		assert_eq!(tabs.len(), 1);
		assert_eq!(tabs[0].name, "claude");
		assert_eq!(tabs[0].command, "claude");

		let bare = TerminalDefaults {
			default_tab: String::new(),
			default_command: String::new(),
			..TerminalDefaults::default()
		};
		let tabs = tabs_or_default(&TerminalConfig::default(), &bare);
		assert_eq!(tabs[0].name, "shell");
		assert!(tabs[0].command.is_empty());

		let configured = TerminalConfig {
			profile: None,
			tabs: vec![TerminalTab {
				name: "logs".to_string(),
				command: "tail -f dev.log".to_string(),
			}],
		};
		let tabs = tabs_or_default(&configured, &TerminalDefaults::default());
		assert_eq!(tabs, configured.tabs);
	}

	#[test]
	fn test_emulator_argv_appends_attach() {
		let argv = emulator_argv(
			&strings(&["x-terminal-emulator", "-e"]),
			"web",
			None,
			"/usr/bin/tmux",
			"am-web",
		);
		assert_eq!(
			argv,
			strings(&["x-terminal-emulator", "-e", "/usr/bin/tmux", "attach-session", "-t", "am-web"])
		);
	}

	#[test]
	fn test_emulator_argv_fills_placeholders() {
		let emulator = strings(&["wezterm", "start", "--class", "{title}", "--profile", "{profile}", "--"]);
		let with = emulator_argv(&emulator, "web", Some("Dark"), "tmux", "am-web");
		assert_eq!(&with[..7], &strings(&["wezterm", "start", "--class", "web", "--profile", "Dark", "--"])[..]);

		let without = emulator_argv(&emulator, "web", None, "tmux", "am-web");
		assert_eq!(&without[..5], &strings(&["wezterm", "start", "--class", "web", "--"])[..]);
	}
}
