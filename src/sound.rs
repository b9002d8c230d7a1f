use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::Notifications;
use crate::exec;

const SOUND_TIMEOUT: Duration = Duration::from_secs(15);

/// "Work completed" cue. Fire-and-forget: callers never wait on it.
pub trait NotificationSink: Send + Sync {
	fn play(&self);
}

pub struct SoundCommand {
	settings: Notifications,
}

impl SoundCommand {
	pub fn new(settings: Notifications) -> Self {
		Self { settings }
	}
}

impl NotificationSink for SoundCommand {
	fn play(&self) {
		if !self.settings.enabled {
			return;
		}
		let Some((program, args)) = self.settings.command.split_first() else {
			return;
		};
		let mut cmd = Command::new(program);
		cmd.args(args);
		tokio::spawn(async move {
			if let Err(err) = exec::output(cmd, SOUND_TIMEOUT).await {
				debug!(event = "sound_failed", error = %err);
			}
		});
	}
}

#[cfg(test)]
pub(crate) struct CountingSink(pub std::sync::atomic::AtomicUsize);

#[cfg(test)]
impl CountingSink {
	pub fn new() -> Self {
		Self(std::sync::atomic::AtomicUsize::new(0))
	}

	pub fn count(&self) -> usize {
		self.0.load(std::sync::atomic::Ordering::SeqCst)
	}
}

#[cfg(test)]
impl NotificationSink for CountingSink {
	fn play(&self) {
		self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_play_runs_configured_command() {
		let temp = TempDir::new().unwrap();
		let marker = temp.path().join("played");
		let sink = SoundCommand::new(Notifications {
			enabled: true,
			command: vec![
				"touch".to_string(),
				marker.to_string_lossy().into_owned(),
			],
		});
		sink.play();
		for _ in 0..50 {
			if marker.exists() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		assert!(marker.exists());
	}

	#[tokio::test]
	async fn test_disabled_sink_is_silent() {
		let temp = TempDir::new().unwrap();
		let marker = temp.path().join("played");
		let sink = SoundCommand::new(Notifications {
			enabled: false,
			command: vec!["touch".to_string(), marker.to_string_lossy().into_owned()],
		});
		sink.play();
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(!marker.exists());
	}
}
