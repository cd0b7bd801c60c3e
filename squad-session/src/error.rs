//! Error types for squad-session providers.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the tmux and git capability providers.
///
/// The [`Instance`](crate::Instance) maps these into the `SquadError` variant
/// of the operation that failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider binary could not be executed at all.
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("session '{0}' does not exist")]
    SessionMissing(String),

    #[error("worktree {0} does not exist")]
    WorktreeMissing(PathBuf),
}
