use anyhow::{bail, Context, Result};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Runs a collaborator command to completion, killing it once `limit` passes.
pub async fn output(mut command: Command, limit: Duration) -> Result<Output> {
	command.stdin(Stdio::null()).kill_on_drop(true);
	let label = format!("{:?}", command.as_std());
	match tokio::time::timeout(limit, command.output()).await {
		Ok(result) => result.with_context(|| format!("failed to run {}", label)),
		Err(_) => bail!("{} timed out after {:?}", label, limit),
	}
}

/// Like [`output`], but a non-zero exit is an error and stdout comes back as text.
pub async fn stdout(command: Command, limit: Duration) -> Result<String> {
	let out = output(command, limit).await?;
	if !out.status.success() {
		bail!(
			"command exited with {}: {}",
			out.status,
			String::from_utf8_lossy(&out.stderr).trim()
		);
	}
	Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}
