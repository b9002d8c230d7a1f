use anyhow::{bail, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::DesktopSettings;
use crate::exec;

const TOOL_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

static QUOTED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"'([^']+)'").unwrap());
static WINDOW_HANDLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:0x)?([0-9A-Fa-f]+)\b").unwrap());

/// Virtual desktop automation. Every operation is best-effort; an
/// unavailable backend makes all of them no-ops.
#[async_trait]
pub trait DesktopController: Send + Sync {
	async fn create(&self, name: &str) -> Result<()>;
	async fn remove(&self, name: &str) -> Result<()>;
	async fn switch_to(&self, name: &str) -> Result<()>;
	/// Name of the focused desktop, `None` when it cannot be determined.
	async fn current_id(&self) -> Result<Option<String>>;
	async fn list_windows(&self, name: &str) -> Result<Vec<String>>;
	/// Returns how many windows were asked to close.
	async fn close_unpinned_windows(&self, name: &str) -> Result<usize>;
	async fn pin(&self, title: &str) -> Result<()>;
}

/// Drives a VirtualDesktop-style command-line tool (`/New /Name:x`,
/// `/Switch:x`, `/GetCurrentDesktop`, ...).
pub struct VirtualDesktopTool {
	tool: Option<PathBuf>,
	close_window: Vec<String>,
	available: OnceCell<bool>,
}

impl VirtualDesktopTool {
	pub fn new(settings: &DesktopSettings) -> Self {
		Self {
			tool: settings.tool_path(),
			close_window: settings.close_window.clone(),
			available: OnceCell::new(),
		}
	}

	async fn is_available(&self) -> bool {
		*self
			.available
			.get_or_init(|| async {
				let Some(tool) = &self.tool else {
					return false;
				};
				let mut cmd = Command::new(tool);
				cmd.arg("/Count");
				// The tool reports the desktop count through its exit code,
				// so only the output tells us it ran.
				match exec::output(cmd, PROBE_TIMEOUT).await {
					Ok(out) if String::from_utf8_lossy(&out.stdout).contains("Count of desktops") => true,
					Ok(_) | Err(_) => {
						warn!(
							event = "desktop_tool_unavailable",
							tool = %tool.display(),
							"virtual desktop management disabled"
						);
						false
					}
				}
			})
			.await
	}

	async fn run(&self, args: &[String]) -> Result<String> {
		if !self.is_available().await {
			return Ok(String::new());
		}
		let Some(tool) = &self.tool else {
			return Ok(String::new());
		};
		let mut cmd = Command::new(tool);
		cmd.args(args);
		let out = exec::output(cmd, TOOL_TIMEOUT).await?;
		let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
		// Non-zero exits are normal for this tool; stdout still carries the answer.
		if stdout.is_empty() && !out.status.success() {
			bail!(
				"desktop tool {:?} failed: {}",
				args,
				String::from_utf8_lossy(&out.stderr).trim()
			);
		}
		debug!(event = "desktop_tool", args = ?args, output = %stdout);
		Ok(stdout)
	}

	async fn is_pinned(&self, handle: &str) -> bool {
		match self.run(&[format!("/IsWindowHandlePinned:{}", handle)]).await {
			Ok(out) => out.contains("pinned") && !out.contains("not pinned"),
			Err(_) => false,
		}
	}

	async fn close_window(&self, handle: &str) -> Result<()> {
		let Some((program, args)) = self.close_window.split_first() else {
			return Ok(());
		};
		let mut cmd = Command::new(program);
		cmd.args(args.iter().map(|a| a.replace("{hwnd}", handle)));
		exec::output(cmd, TOOL_TIMEOUT).await?;
		Ok(())
	}
}

#[async_trait]
impl DesktopController for VirtualDesktopTool {
	async fn create(&self, name: &str) -> Result<()> {
		self.run(&["/New".to_string(), format!("/Name:{}", name)]).await?;
		Ok(())
	}

	async fn remove(&self, name: &str) -> Result<()> {
		self.run(&[format!("/Remove:{}", name)]).await?;
		Ok(())
	}

	async fn switch_to(&self, name: &str) -> Result<()> {
		self.run(&[format!("/Switch:{}", name)]).await?;
		Ok(())
	}

	async fn current_id(&self) -> Result<Option<String>> {
		let out = self.run(&["/GetCurrentDesktop".to_string()]).await?;
		Ok(parse_current_desktop(&out))
	}

	async fn list_windows(&self, name: &str) -> Result<Vec<String>> {
		let out = self.run(&[format!("/ListWindowsOnDesktop:{}", name)]).await?;
		Ok(parse_window_handles(&out))
	}

	async fn close_unpinned_windows(&self, name: &str) -> Result<usize> {
		if self.close_window.is_empty() {
			return Ok(0);
		}
		let mut closed = 0;
		for handle in self.list_windows(name).await? {
			if self.is_pinned(&handle).await {
				continue;
			}
			match self.close_window(&handle).await {
				Ok(()) => closed += 1,
				Err(err) => warn!(event = "close_window_failed", handle = %handle, error = %err),
			}
		}
		Ok(closed)
	}

	async fn pin(&self, title: &str) -> Result<()> {
		self.run(&[format!("/PinWindowHandle:{}", title)]).await?;
		Ok(())
	}
}

/// `Current desktop: 'web' (desktop number 2)` → `web`.
pub fn parse_current_desktop(output: &str) -> Option<String> {
	let output = output.trim();
	if output.is_empty() {
		return None;
	}
	let id = QUOTED_NAME
		.captures(output)
		.and_then(|c| c.get(1))
		.map(|m| m.as_str().to_string())
		.unwrap_or_else(|| output.to_string());
	Some(id)
}

pub fn parse_window_handles(output: &str) -> Vec<String> {
	output
		.lines()
		.filter_map(|line| WINDOW_HANDLE.captures(line))
		.filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
		.collect()
}
