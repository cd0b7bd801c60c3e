//! Error types for squad-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Status;

/// Failures of the on-disk snapshot and configuration files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.squad/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Errors surfaced by instance lifecycle and orchestration operations.
///
/// Every lifecycle operation that returns one of these leaves the instance in
/// the state it had before the call.
#[derive(Debug, Error)]
pub enum SquadError {
    /// Session or worktree creation failed. Not retriable without operator action
    /// (typically a branch or session name collision).
    #[error("failed to provision '{title}': {detail}")]
    Provision { title: String, detail: String },

    /// The instance branch is checked out in the base repository.
    #[error("instance '{title}' is currently checked out (branch '{branch}'); check out another branch first")]
    Conflict { title: String, branch: String },

    /// The goal decomposed into an empty or malformed plan.
    #[error("invalid plan: {0}")]
    Decomposition(String),

    /// Commit or publish of worktree changes failed.
    #[error("failed to push changes for '{title}': {detail}")]
    Push { title: String, detail: String },

    /// Transient polling failure. Logged by the polling loop, never fatal.
    #[error("probe failed for '{title}': {detail}")]
    Probe { title: String, detail: String },

    /// The terminal session rejected input or could not be closed.
    #[error("session error for '{title}': {detail}")]
    Session { title: String, detail: String },

    /// The worktree could not be read (paused, removed, or git failure).
    #[error("worktree unavailable for '{title}': {detail}")]
    Worktree { title: String, detail: String },

    #[error("invalid title '{title}': {reason}")]
    InvalidTitle { title: String, reason: String },

    #[error("cannot {op} instance '{title}' while it is {status}")]
    InvalidState {
        op: &'static str,
        title: String,
        status: Status,
    },

    #[error("you can't create more than {limit} instances")]
    CapacityExhausted { limit: usize },

    #[error("instance '{0}' not found")]
    NotFound(String),

    #[error("orchestration aborted: {0}")]
    RunAborted(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SquadError {
    /// Whether the operator can retry the same operation after fixing the
    /// external condition (checking out another branch, re-submitting a goal).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SquadError::Conflict { .. }
                | SquadError::Decomposition(_)
                | SquadError::Push { .. }
                | SquadError::Probe { .. }
        )
    }
}
