//! git-worktree-backed [`Worktree`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use squad_core::DiffStats;

use crate::backend::Worktree;
use crate::error::ProviderError;
use crate::runner::{args, run_checked, run_raw, run_stdout, CommandRunner};

const GIT: &str = "git";

pub struct GitWorktree {
    /// Base repository; resolved to its top level on `setup`.
    repo: PathBuf,
    path: PathBuf,
    branch: String,
    base_commit: Option<String>,
    runner: Arc<dyn CommandRunner>,
}

impl GitWorktree {
    pub fn new(
        repo: &Path,
        path: PathBuf,
        branch: String,
        base_commit: Option<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            repo: repo.to_path_buf(),
            path,
            branch,
            base_commit,
            runner,
        }
    }

    fn in_repo(&self, argv: Vec<OsString>) -> Result<String, ProviderError> {
        run_stdout(self.runner.as_ref(), GIT, &argv, Some(&self.repo))
    }

    fn in_tree(&self, argv: Vec<OsString>) -> Result<String, ProviderError> {
        run_stdout(self.runner.as_ref(), GIT, &argv, Some(&self.path))
    }

    fn branch_exists(&self) -> Result<bool, ProviderError> {
        let refname = format!("refs/heads/{}", self.branch);
        let output = run_raw(
            self.runner.as_ref(),
            GIT,
            &args(["rev-parse", "--verify", "--quiet", refname.as_str()]),
            Some(&self.repo),
        )?;
        Ok(output.status.success())
    }

    fn has_remote(&self) -> Result<bool, ProviderError> {
        Ok(!self.in_repo(args(["remote"]))?.is_empty())
    }

    fn require_tree(&self) -> Result<(), ProviderError> {
        if self.exists() {
            Ok(())
        } else {
            Err(ProviderError::WorktreeMissing(self.path.clone()))
        }
    }

    fn has_staged_changes(&self) -> Result<bool, ProviderError> {
        let argv = args(["diff", "--cached", "--quiet"]);
        let output = run_raw(self.runner.as_ref(), GIT, &argv, Some(&self.path))?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(crate::runner::command_failed(GIT, &argv, &output)),
        }
    }

    fn commit_staged(&self, message: &str) -> Result<(), ProviderError> {
        self.in_tree(args(["commit", "-m", message, "--no-verify"]))
            .map(|_| ())
    }

    fn add_worktree(&self, new_branch: bool) -> Result<(), ProviderError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ProviderError::Spawn {
                program: format!("mkdir {}", parent.display()),
                source,
            })?;
        }
        let mut argv = args(["worktree", "add"]);
        if new_branch {
            argv.extend(args(["-b", self.branch.as_str()]));
            argv.push(self.path.as_os_str().to_os_string());
            argv.push(self.base_commit.clone().unwrap_or_else(|| "HEAD".into()).into());
        } else {
            argv.push(self.path.as_os_str().to_os_string());
            argv.push(self.branch.clone().into());
        }
        self.in_repo(argv).map(|_| ())
    }
}

impl Worktree for GitWorktree {
    fn branch(&self) -> &str {
        &self.branch
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn base_commit(&self) -> Option<&str> {
        self.base_commit.as_deref()
    }

    fn setup(&mut self) -> Result<(), ProviderError> {
        let top = self.in_repo(args(["rev-parse", "--show-toplevel"]))?;
        self.repo = PathBuf::from(top);
        if self.branch_exists()? {
            return Err(ProviderError::CommandFailed {
                command: format!("git worktree add -b {}", self.branch),
                detail: format!("branch '{}' already exists", self.branch),
            });
        }
        if self.path.exists() {
            return Err(ProviderError::CommandFailed {
                command: format!("git worktree add {}", self.path.display()),
                detail: format!("{} already exists", self.path.display()),
            });
        }
        self.base_commit = Some(self.in_repo(args(["rev-parse", "HEAD"]))?);
        self.add_worktree(true)?;
        debug!(branch = %self.branch, path = %self.path.display(), "worktree created");
        Ok(())
    }

    fn reattach(&mut self) -> Result<(), ProviderError> {
        if self.exists() {
            return Ok(());
        }
        if !self.branch_exists()? {
            return Err(ProviderError::CommandFailed {
                command: format!("git worktree add {}", self.path.display()),
                detail: format!("branch '{}' no longer exists", self.branch),
            });
        }
        self.in_repo(args(["worktree", "prune"]))?;
        if self.base_commit.is_none() {
            let merge_base = self.in_repo(args(["merge-base", "HEAD", self.branch.as_str()]))?;
            self.base_commit = Some(merge_base);
        }
        self.add_worktree(false)?;
        debug!(branch = %self.branch, path = %self.path.display(), "worktree reattached");
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.join(".git").exists()
    }

    fn is_branch_checked_out(&self) -> Result<bool, ProviderError> {
        let current = self.in_repo(args(["branch", "--show-current"]))?;
        Ok(current == self.branch)
    }

    fn commit(&mut self, message: &str) -> Result<bool, ProviderError> {
        self.require_tree()?;
        self.in_tree(args(["add", "-A"]))?;
        if !self.has_staged_changes()? {
            return Ok(false);
        }
        self.commit_staged(message)?;
        Ok(true)
    }

    fn push(&mut self, message: &str, include_untracked: bool) -> Result<(), ProviderError> {
        self.require_tree()?;
        let stage = if include_untracked { "-A" } else { "-u" };
        self.in_tree(args(["add", stage]))?;
        if self.has_staged_changes()? {
            self.commit_staged(message)?;
        }
        if self.has_remote()? {
            self.in_tree(args(["push", "-u", "origin", self.branch.as_str()]))?;
        } else {
            debug!(branch = %self.branch, "no remote configured; committed locally");
        }
        Ok(())
    }

    fn detach(&mut self) -> Result<(), ProviderError> {
        if self.path.exists() {
            let mut argv = args(["worktree", "remove", "--force"]);
            argv.push(self.path.as_os_str().to_os_string());
            if let Err(err) = self.in_repo(argv) {
                warn!(path = %self.path.display(), error = %err, "git worktree remove failed; deleting directory");
                std::fs::remove_dir_all(&self.path).map_err(|source| ProviderError::Spawn {
                    program: format!("rm -r {}", self.path.display()),
                    source,
                })?;
            }
        }
        self.in_repo(args(["worktree", "prune"]))?;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), ProviderError> {
        self.detach()?;
        if self.branch_exists()? {
            self.in_repo(args(["branch", "-D", self.branch.as_str()]))?;
        }
        Ok(())
    }

    fn diff(&self) -> Result<DiffStats, ProviderError> {
        self.require_tree()?;
        // Intent-to-add makes untracked files show up in the diff.
        self.in_tree(args(["add", "-N", "."]))?;
        let base = self.base_commit.as_deref().unwrap_or("HEAD");
        let output = run_checked(
            self.runner.as_ref(),
            GIT,
            &args(["--no-pager", "diff", base]),
            Some(&self.path),
        )?;
        Ok(DiffStats::from_diff(String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::stub::{fail, ok, StubRunner};
    use tempfile::TempDir;

    fn worktree(
        repo: &Path,
        path: PathBuf,
        base_commit: Option<&str>,
        results: Vec<std::io::Result<std::process::Output>>,
    ) -> (GitWorktree, Arc<StubRunner>) {
        let runner = Arc::new(StubRunner::with_results(results));
        let wt = GitWorktree::new(
            repo,
            path,
            "squad/api".to_string(),
            base_commit.map(str::to_string),
            runner.clone(),
        );
        (wt, runner)
    }

    /// A directory that looks like a live worktree.
    fn live_tree(root: &TempDir) -> PathBuf {
        let path = root.path().join("wt");
        std::fs::create_dir_all(&path).expect("mkdir");
        std::fs::write(path.join(".git"), "gitdir: /repo/.git/worktrees/wt").expect("write");
        path
    }

    #[test]
    fn setup_records_head_and_creates_branch() {
        let root = TempDir::new().expect("tempdir");
        let path = root.path().join("worktrees").join("api");
        let (mut wt, runner) = worktree(
            Path::new("/repo/sub"),
            path.clone(),
            None,
            vec![ok("/repo\n"), fail(""), ok("abc123\n"), ok("")],
        );
        wt.setup().expect("setup");

        assert_eq!(wt.base_commit(), Some("abc123"));
        let calls = runner.calls();
        assert_eq!(calls[0].1, vec!["rev-parse", "--show-toplevel"]);
        assert_eq!(calls[1].1, vec!["rev-parse", "--verify", "--quiet", "refs/heads/squad/api"]);
        assert_eq!(calls[1].2.as_deref(), Some(Path::new("/repo")));
        assert_eq!(
            calls[3].1,
            vec![
                "worktree".to_string(),
                "add".to_string(),
                "-b".to_string(),
                "squad/api".to_string(),
                path.display().to_string(),
                "abc123".to_string(),
            ]
        );
        assert_eq!(runner.remaining(), 0);
    }

    #[test]
    fn setup_rejects_existing_branch() {
        let root = TempDir::new().expect("tempdir");
        let (mut wt, runner) = worktree(
            Path::new("/repo"),
            root.path().join("api"),
            None,
            vec![ok("/repo"), ok("deadbeef")],
        );
        let err = wt.setup().unwrap_err();
        assert!(err.to_string().contains("already exists"), "got: {err}");
        assert_eq!(runner.calls().len(), 2, "nothing may be created after the collision");
    }

    #[test]
    fn checked_out_compares_current_branch() {
        let root = TempDir::new().expect("tempdir");
        let (wt, _) = worktree(
            Path::new("/repo"),
            root.path().join("api"),
            None,
            vec![ok("squad/api\n"), ok("main\n")],
        );
        assert!(wt.is_branch_checked_out().expect("first"));
        assert!(!wt.is_branch_checked_out().expect("second"));
    }

    #[test]
    fn commit_on_clean_tree_is_noop() {
        let root = TempDir::new().expect("tempdir");
        let path = live_tree(&root);
        let (mut wt, runner) = worktree(Path::new("/repo"), path, None, vec![ok(""), ok("")]);
        assert!(!wt.commit("msg").expect("commit"));
        assert_eq!(runner.calls().len(), 2, "no commit command on a clean index");
    }

    #[test]
    fn push_stages_tracked_only_and_skips_missing_remote() {
        let root = TempDir::new().expect("tempdir");
        let path = live_tree(&root);
        let (mut wt, runner) = worktree(
            Path::new("/repo"),
            path,
            None,
            vec![
                ok(""),
                Ok(crate::runner::stub::output_with_status(1, b"", b"")),
                ok(""),
                ok(""),
            ],
        );
        wt.push("[squad] update", false).expect("push");
        let calls = runner.calls();
        assert_eq!(calls[0].1, vec!["add", "-u"]);
        assert_eq!(calls[2].1, vec!["commit", "-m", "[squad] update", "--no-verify"]);
        assert_eq!(calls[3].1, vec!["remote"]);
        assert_eq!(calls.len(), 4, "no push without a remote");
    }

    #[test]
    fn push_publishes_when_remote_exists() {
        let root = TempDir::new().expect("tempdir");
        let path = live_tree(&root);
        let (mut wt, runner) = worktree(
            Path::new("/repo"),
            path,
            None,
            vec![ok(""), ok(""), ok("origin\n"), ok("")],
        );
        wt.push("msg", true).expect("push");
        let calls = runner.calls();
        assert_eq!(calls[0].1, vec!["add", "-A"]);
        assert_eq!(calls[3].1, vec!["push", "-u", "origin", "squad/api"]);
    }

    #[test]
    fn diff_requires_worktree() {
        let root = TempDir::new().expect("tempdir");
        let (wt, runner) = worktree(Path::new("/repo"), root.path().join("gone"), Some("abc"), vec![]);
        assert!(matches!(wt.diff(), Err(ProviderError::WorktreeMissing(_))));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn diff_is_taken_against_base_commit() {
        let root = TempDir::new().expect("tempdir");
        let path = live_tree(&root);
        let (wt, runner) = worktree(
            Path::new("/repo"),
            path,
            Some("abc123"),
            vec![ok(""), ok("--- a/x\n+++ b/x\n+one\n+two\n-three\n")],
        );
        let stats = wt.diff().expect("diff");
        assert_eq!((stats.added, stats.removed), (2, 1));
        assert_eq!(runner.calls()[1].1, vec!["--no-pager", "diff", "abc123"]);
    }

    #[test]
    fn detach_keeps_branch_and_cleanup_deletes_it() {
        let root = TempDir::new().expect("tempdir");
        let path = live_tree(&root);
        let (mut wt, runner) = worktree(
            Path::new("/repo"),
            path,
            None,
            vec![ok(""), ok(""), ok("sha"), ok("")],
        );
        wt.cleanup().expect("cleanup");
        let calls = runner.calls();
        assert_eq!(calls[0].1[..3], ["worktree", "remove", "--force"]);
        assert_eq!(calls[1].1, vec!["worktree", "prune"]);
        assert_eq!(calls[3].1, vec!["branch", "-D", "squad/api"]);
    }
}
