use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{WatchEvent, Watcher};
use crate::desktop::DesktopController;

pub struct DesktopWatcher {
	desktop: Arc<dyn DesktopController>,
	interval: Duration,
	last: Option<String>,
}

impl DesktopWatcher {
	pub fn new(desktop: Arc<dyn DesktopController>, interval: Duration) -> Self {
		Self {
			desktop,
			interval,
			last: None,
		}
	}
}

#[async_trait]
impl Watcher for DesktopWatcher {
	fn name(&self) -> String {
		"desktop".to_string()
	}

	fn interval(&self) -> Duration {
		self.interval
	}

	async fn observe(&mut self) -> Result<Vec<WatchEvent>> {
		let Some(current) = self.desktop.current_id().await? else {
			return Ok(Vec::new());
		};
		if current.is_empty() || self.last.as_deref() == Some(current.as_str()) {
			return Ok(Vec::new());
		}
		self.last = Some(current.clone());
		Ok(vec![WatchEvent::Desktop(current)])
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use parking_lot::Mutex;

	/// Desktop controller that records calls and reports a settable focus.
	#[derive(Default)]
	pub(crate) struct FakeDesktop {
		pub current: Mutex<Option<String>>,
		pub calls: Mutex<Vec<String>>,
	}

	impl FakeDesktop {
		pub fn calls(&self) -> Vec<String> {
			self.calls.lock().clone()
		}
	}

	#[async_trait]
	impl DesktopController for FakeDesktop {
		async fn create(&self, name: &str) -> Result<()> {
			self.calls.lock().push(format!("create:{}", name));
			Ok(())
		}

		async fn remove(&self, name: &str) -> Result<()> {
			self.calls.lock().push(format!("remove:{}", name));
			Ok(())
		}

		async fn switch_to(&self, name: &str) -> Result<()> {
			self.calls.lock().push(format!("switch:{}", name));
			*self.current.lock() = Some(name.to_string());
			Ok(())
		}

		async fn current_id(&self) -> Result<Option<String>> {
			Ok(self.current.lock().clone())
		}

		async fn list_windows(&self, _name: &str) -> Result<Vec<String>> {
			Ok(Vec::new())
		}

		async fn close_unpinned_windows(&self, name: &str) -> Result<usize> {
			self.calls.lock().push(format!("close_windows:{}", name));
			Ok(0)
		}

		async fn pin(&self, title: &str) -> Result<()> {
			self.calls.lock().push(format!("pin:{}", title));
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_emits_on_focus_change_only() {
		let fake = Arc::new(FakeDesktop::default());
		let mut watcher = DesktopWatcher::new(fake.clone(), Duration::from_secs(1));
		assert!(watcher.observe().await.unwrap().is_empty());

		*fake.current.lock() = Some("web".to_string());
		assert_eq!(
			watcher.observe().await.unwrap(),
			vec![WatchEvent::Desktop("web".to_string())]
		);
		assert!(watcher.observe().await.unwrap().is_empty());

		*fake.current.lock() = Some(String::new());
		assert!(watcher.observe().await.unwrap().is_empty());

		*fake.current.lock() = Some("0".to_string());
		assert_eq!(watcher.observe().await.unwrap().len(), 1);
	}
}
