use crate::model::{AgentTab, TabState};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Agents prefix their tab title with a spinner glyph while they work.
pub const DEFAULT_PROCESSING_PATTERN: &str = r"^[^\x00-\x7F] .+";

#[derive(Clone)]
pub struct TitlePredicate {
	pattern: Regex,
}

impl TitlePredicate {
	pub fn new(pattern: Option<&str>) -> Result<Self> {
		let source = pattern.unwrap_or(DEFAULT_PROCESSING_PATTERN);
		let pattern = Regex::new(source)
			.with_context(|| format!("invalid processing title pattern {:?}", source))?;
		Ok(Self { pattern })
	}

	pub fn is_processing(&self, title: &str) -> bool {
		self.pattern.is_match(title)
	}

	pub fn processing_titles(&self, titles: &[String]) -> Vec<String> {
		titles
			.iter()
			.filter(|t| self.is_processing(t))
			.cloned()
			.collect()
	}
}

impl Default for TitlePredicate {
	fn default() -> Self {
		Self {
			pattern: Regex::new(DEFAULT_PROCESSING_PATTERN).unwrap(),
		}
	}
}

/// True when a title that was processing last tick is gone now.
pub fn any_finished(previous: &[String], current: &[String]) -> bool {
	let current: BTreeSet<&str> = current.iter().map(String::as_str).collect();
	previous.iter().any(|t| !current.contains(t.as_str()))
}

/// Processing tabs always survive; everything else only while its last
/// activity is younger than `threshold`.
pub fn filter_stale(tabs: Vec<AgentTab>, now: DateTime<Utc>, threshold: Duration) -> Vec<AgentTab> {
	tabs.into_iter()
		.filter(|tab| {
			if tab.state == TabState::Processing {
				return true;
			}
			// Activity stamped in the future counts as fresh.
			match (now - tab.last_activity).to_std() {
				Ok(age) => age < threshold,
				Err(_) => true,
			}
		})
		.collect()
}

/// Tab names that went from processing to idle since the last observation.
pub fn finished_tabs(previous: &HashMap<String, TabState>, tabs: &[AgentTab]) -> Vec<String> {
	tabs.iter()
		.filter(|tab| {
			tab.state == TabState::Idle
				&& previous.get(&tab.tab_name) == Some(&TabState::Processing)
		})
		.map(|tab| tab.tab_name.clone())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn tab(name: &str, state: TabState, age_secs: i64, now: DateTime<Utc>) -> AgentTab {
		AgentTab {
			tab_name: name.to_string(),
			state,
			last_prompt: String::new(),
			last_activity: now - chrono::Duration::seconds(age_secs),
		}
	}

	#[test]
	fn test_stale_idle_tabs_drop_at_threshold() {
		let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
		let tabs = vec![
			tab("fresh", TabState::Idle, 59, now),
			tab("stale", TabState::Idle, 61, now),
			tab("edge", TabState::Inactive, 60, now),
			tab("busy", TabState::Processing, 3600, now),
		];
		let kept: Vec<_> = filter_stale(tabs, now, Duration::from_secs(60))
			.into_iter()
			.map(|t| t.tab_name)
			.collect();
		assert_eq!(kept, vec!["fresh", "busy"]);
	}

	#[test]
	fn test_default_predicate_matches_spinner_titles() {
		let predicate = TitlePredicate::default();
		assert!(predicate.is_processing("✳ Refactor parser"));
		assert!(predicate.is_processing("⠂ claude"));
		assert!(!predicate.is_processing("zsh"));
		assert!(!predicate.is_processing("✳"));
		assert!(!predicate.is_processing("* ascii star"));
	}

	#[test]
	fn test_custom_predicate_replaces_default() {
		let predicate = TitlePredicate::new(Some(r"^\[busy\]")).unwrap();
		assert!(predicate.is_processing("[busy] tests"));
		assert!(!predicate.is_processing("✳ Refactor parser"));
		assert!(TitlePredicate::new(Some("(unclosed")).is_err());
	}

	#[test]
	fn test_vanished_title_counts_as_finished() {
		let before = vec!["✳ build".to_string(), "✳ test".to_string()];
		assert!(!any_finished(&before, &before));
		assert!(any_finished(&before, &["✳ test".to_string()]));
		assert!(!any_finished(&[], &before));
	}

	#[test]
	fn test_finished_tabs_need_processing_then_idle() {
		let now = Utc::now();
		let previous = HashMap::from([
			("api".to_string(), TabState::Processing),
			("web".to_string(), TabState::Idle),
		]);
		let tabs = vec![
			tab("api", TabState::Idle, 0, now),
			tab("web", TabState::Idle, 0, now),
			tab("new", TabState::Idle, 0, now),
		];
		assert_eq!(finished_tabs(&previous, &tabs), vec!["api"]);
	}
}
