use thiserror::Error;

/// Errors a caller of the command surface can see.
///
/// Collaborator failures (desktop tool, tmux, git, sound) never end up here:
/// they are logged and degraded to empty results at the call site.
#[derive(Debug, Error)]
pub enum ManagerError {
	#[error("project not found: {0}")]
	NotFound(String),

	#[error("{0}")]
	Validation(String),

	#[error("{0}")]
	Conflict(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Internal(#[from] anyhow::Error),
}

impl ManagerError {
	pub fn validation(message: impl Into<String>) -> Self {
		ManagerError::Validation(message.into())
	}

	pub fn conflict(message: impl Into<String>) -> Self {
		ManagerError::Conflict(message.into())
	}
}

pub type ManagerResult<T> = std::result::Result<T, ManagerError>;
