//! Capability interfaces for the terminal session and the isolated worktree.
//!
//! The [`Instance`](crate::Instance) state machine only talks to these traits;
//! [`SystemBackend`] binds them to tmux and git, `FakeBackend` (feature `fake`)
//! keeps everything in memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use squad_core::config::Config;
use squad_core::storage::worktrees_dir_at;
use squad_core::{branch_name, slug, DiffStats};

use crate::error::ProviderError;
use crate::git::GitWorktree;
use crate::runner::{CommandRunner, ProcessCommandRunner};
use crate::tmux::TmuxSession;

/// Outcome of one session probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Probe {
    /// Output differs from the previous probe (always true on the first one).
    pub changed: bool,
    /// A confirmation prompt is on screen.
    pub awaiting_confirmation: bool,
}

/// A persistent interactive session running one agent program.
pub trait Session: Send {
    fn name(&self) -> &str;

    fn exists(&self) -> bool;

    /// Spawn `program` detached, with `workdir` as its working directory.
    fn start(&mut self, program: &str, workdir: &Path) -> Result<(), ProviderError>;

    /// Bind to a session that is already running `program`.
    fn restore(&mut self, program: &str) -> Result<(), ProviderError>;

    /// Kill the session. A session that is already gone is not an error.
    fn close(&mut self) -> Result<(), ProviderError>;

    /// Compare the current output with the previous probe.
    fn probe(&mut self) -> Result<Probe, ProviderError>;

    /// Current visible output.
    fn capture(&self) -> Result<String, ProviderError>;

    /// Type `text` followed by Enter.
    fn send_keys(&mut self, text: &str) -> Result<(), ProviderError>;

    fn tap_enter(&mut self) -> Result<(), ProviderError>;
}

/// A working directory bound to a dedicated branch of the base repository.
pub trait Worktree: Send {
    fn branch(&self) -> &str;

    fn path(&self) -> &Path;

    /// Commit the branch was created from. Diffs are taken against it.
    fn base_commit(&self) -> Option<&str>;

    /// Create the branch and its working directory from the current `HEAD`.
    fn setup(&mut self) -> Result<(), ProviderError>;

    /// Recreate the working directory from the preserved branch.
    fn reattach(&mut self) -> Result<(), ProviderError>;

    /// Whether the working directory is present.
    fn exists(&self) -> bool;

    /// Whether the branch is the one checked out in the base repository.
    fn is_branch_checked_out(&self) -> Result<bool, ProviderError>;

    /// Commit every outstanding change. Returns whether a commit was made.
    fn commit(&mut self, message: &str) -> Result<bool, ProviderError>;

    /// Commit staged changes and publish the branch. A clean tree is a no-op commit.
    fn push(&mut self, message: &str, include_untracked: bool) -> Result<(), ProviderError>;

    /// Remove the working directory, keeping the branch.
    fn detach(&mut self) -> Result<(), ProviderError>;

    /// Remove the working directory and delete the branch.
    fn cleanup(&mut self) -> Result<(), ProviderError>;

    fn diff(&self) -> Result<DiffStats, ProviderError>;
}

/// Identity of a worktree created earlier, used when reconstructing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeRef {
    pub branch: String,
    pub base_commit: Option<String>,
}

/// Factory for the providers of one instance.
pub trait Backend: Send + Sync {
    fn session(&self, title: &str) -> Box<dyn Session>;

    /// A worktree handle for `title`. `existing` rebinds to a branch created earlier.
    fn worktree(
        &self,
        base_path: &Path,
        title: &str,
        existing: Option<WorktreeRef>,
    ) -> Box<dyn Worktree>;
}

// ---------------------------------------------------------------------------
// SystemBackend
// ---------------------------------------------------------------------------

/// tmux sessions and git worktrees under `~/.squad/worktrees/`.
#[derive(Clone)]
pub struct SystemBackend {
    runner: Arc<dyn CommandRunner>,
    worktrees_dir: PathBuf,
    branch_prefix: String,
}

impl SystemBackend {
    pub fn new(home: &Path, config: &Config) -> Self {
        Self::with_runner(home, config, Arc::new(ProcessCommandRunner))
    }

    pub fn with_runner(home: &Path, config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            worktrees_dir: worktrees_dir_at(home),
            branch_prefix: config.branch_prefix.clone(),
        }
    }
}

impl Backend for SystemBackend {
    fn session(&self, title: &str) -> Box<dyn Session> {
        Box::new(TmuxSession::new(title, Arc::clone(&self.runner)))
    }

    fn worktree(
        &self,
        base_path: &Path,
        title: &str,
        existing: Option<WorktreeRef>,
    ) -> Box<dyn Worktree> {
        let path = self.worktrees_dir.join(slug(title));
        let (branch, base_commit) = match existing {
            Some(r) => (r.branch, r.base_commit),
            None => (branch_name(&self.branch_prefix, title), None),
        };
        Box::new(GitWorktree::new(
            base_path,
            path,
            branch,
            base_commit,
            Arc::clone(&self.runner),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn system_backend_derives_names_from_title() {
        let home = TempDir::new().expect("tempdir");
        let backend = SystemBackend::new(home.path(), &Config::default());
        let session = backend.session("Add health endpoint");
        assert_eq!(session.name(), "squad_Add_health_endpoint");

        let worktree = backend.worktree(Path::new("/code/api"), "Add health endpoint", None);
        assert_eq!(worktree.branch(), "squad/add-health-endpoint");
        assert!(worktree
            .path()
            .ends_with(".squad/worktrees/add-health-endpoint"));
        assert!(worktree.base_commit().is_none());
    }

    #[test]
    fn existing_ref_keeps_stored_branch() {
        let home = TempDir::new().expect("tempdir");
        let backend = SystemBackend::new(home.path(), &Config::default());
        let worktree = backend.worktree(
            Path::new("/code/api"),
            "api",
            Some(WorktreeRef {
                branch: "old-prefix/api".to_string(),
                base_commit: Some("abc".to_string()),
            }),
        );
        assert_eq!(worktree.branch(), "old-prefix/api");
        assert_eq!(worktree.base_commit(), Some("abc"));
    }
}
