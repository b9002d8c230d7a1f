use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::exec;

const GIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInfo {
	pub branch: String,
	pub status_summary: String,
}

#[async_trait]
pub trait GitInspector: Send + Sync {
	/// Branch and compact status of the repository at `path`. A path that is
	/// not a repository, or a git that fails, yields empty strings.
	async fn info(&self, path: &str) -> GitInfo;
}

pub struct GitCli {
	timeout: Duration,
}

impl GitCli {
	pub fn new() -> Self {
		Self {
			timeout: GIT_TIMEOUT,
		}
	}

	async fn git(&self, path: &str, args: &[&str]) -> Option<String> {
		let mut cmd = Command::new("git");
		cmd.args(args).current_dir(path);
		match exec::stdout(cmd, self.timeout).await {
			Ok(out) => Some(out),
			Err(err) => {
				debug!(event = "git_failed", path, args = ?args, error = %err);
				None
			}
		}
	}
}

impl Default for GitCli {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl GitInspector for GitCli {
	async fn info(&self, path: &str) -> GitInfo {
		let branch = self
			.git(path, &["rev-parse", "--abbrev-ref", "HEAD"])
			.await
			.map(|out| out.trim().to_string())
			.unwrap_or_default();
		let status_summary = self
			.git(path, &["status", "--porcelain"])
			.await
			.map(|out| summarize_status(&out))
			.unwrap_or_default();
		GitInfo {
			branch,
			status_summary,
		}
	}
}

/// Condenses `git status --porcelain` into `"<n>M <n>U <n>S"`, omitting empty
/// buckets, or `"clean"`.
pub fn summarize_status(porcelain: &str) -> String {
	let (mut modified, mut untracked, mut staged) = (0, 0, 0);
	for line in porcelain.lines() {
		let bytes = line.as_bytes();
		if bytes.len() < 2 {
			continue;
		}
		let (x, y) = (bytes[0], bytes[1]);
		match (x, y) {
			(b'?', b'?') => untracked += 1,
			(b'!', b'!') => {}
			_ => {
				if x == b'M' || y != b' ' {
					modified += 1;
				}
				if x != b' ' {
					staged += 1;
				}
			}
		}
	}

	let parts: Vec<String> = [(modified, 'M'), (untracked, 'U'), (staged, 'S')]
		.iter()
		.filter(|(n, _)| *n > 0)
		.map(|(n, code)| format!("{}{}", n, code))
		.collect();
	if parts.is_empty() {
		"clean".to_string()
	} else {
		parts.join(" ")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_summary_counts_each_bucket() {
		assert_eq!(summarize_status("M  a.txt\n?? b.txt\n M c.txt\n"), "2M 1U 1S");
	}

	#[test]
	fn test_summary_of_nothing_is_clean() {
		assert_eq!(summarize_status(""), "clean");
		assert_eq!(summarize_status("\n"), "clean");
	}

	#[test]
	fn test_staged_add_is_not_modified() {
		assert_eq!(summarize_status("A  new.rs\nD  old.rs\n"), "2S");
		assert_eq!(summarize_status("AM new.rs\n"), "1M 1S");
	}

	#[tokio::test]
	async fn test_non_repository_yields_empty_info() {
		let temp = TempDir::new().unwrap();
		let info = GitCli::new().info(&temp.path().to_string_lossy()).await;
		assert_eq!(info, GitInfo::default());
	}
}
