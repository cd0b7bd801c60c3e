//! The [`Instance`] state machine.
//!
//! `NotStarted → Running ⇄ Ready`, `Running/Ready → Paused ⇄ Running`,
//! `{Running, Ready, Paused} → Killed`.
//!
//! Every operation either completes its transition or returns an error with the
//! status unchanged. Session and worktree are provisioned together and released
//! together; a paused instance holds neither, only its branch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use squad_core::{validate_title, DiffStats, InstanceSnapshot, SquadError, Status};

use crate::backend::{Backend, Probe, Session, Worktree, WorktreeRef};
use crate::error::ProviderError;

/// Parameters of a new, unstarted instance.
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    pub title: String,
    pub base_path: PathBuf,
    pub program: String,
    pub auto_yes: bool,
}

pub struct Instance {
    title: String,
    base_path: PathBuf,
    program: String,
    auto_yes: bool,
    status: Status,
    diff_stats: DiffStats,
    branch: String,
    base_commit: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    session: Option<Box<dyn Session>>,
    worktree: Option<Box<dyn Worktree>>,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("title", &self.title)
            .field("status", &self.status)
            .field("branch", &self.branch)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl Instance {
    pub fn new(options: InstanceOptions, backend: Arc<dyn Backend>) -> Result<Self, SquadError> {
        validate_title(&options.title)?;
        let now = Utc::now();
        Ok(Self {
            title: options.title,
            base_path: options.base_path,
            program: options.program,
            auto_yes: options.auto_yes,
            status: Status::NotStarted,
            diff_stats: DiffStats::default(),
            branch: String::new(),
            base_commit: None,
            created_at: now,
            updated_at: now,
            session: None,
            worktree: None,
            backend,
        })
    }

    /// Rebuild a persisted instance. It is dormant: it keeps its stored status
    /// but holds no handles until [`start`](Self::start)`(false)` or
    /// [`resume`](Self::resume).
    pub fn from_snapshot(snapshot: InstanceSnapshot, backend: Arc<dyn Backend>) -> Self {
        Self {
            title: snapshot.title,
            base_path: snapshot.base_path,
            program: snapshot.program,
            auto_yes: snapshot.auto_yes,
            status: snapshot.status,
            diff_stats: DiffStats::default(),
            branch: snapshot.branch,
            base_commit: snapshot.base_commit,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            session: None,
            worktree: None,
            backend,
        }
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            title: self.title.clone(),
            base_path: self.base_path.clone(),
            program: self.program.clone(),
            auto_yes: self.auto_yes,
            status: self.status,
            branch: self.branch.clone(),
            base_commit: self.base_commit.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    pub fn set_auto_yes(&mut self, auto_yes: bool) {
        self.auto_yes = auto_yes;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn diff_stats(&self) -> &DiffStats {
        &self.diff_stats
    }

    /// Empty until the instance has been started.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn base_commit(&self) -> Option<&str> {
        self.base_commit.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn worktree_path(&self) -> Option<&Path> {
        self.worktree.as_ref().map(|w| w.path())
    }

    /// Whether live session and worktree handles are held.
    pub fn is_bound(&self) -> bool {
        self.session.is_some() && self.worktree.is_some()
    }

    /// Started, not paused, and bound: the polling loop's working set.
    pub fn is_active(&self) -> bool {
        self.is_bound() && self.status.is_live()
    }

    /// Reconstructed from a snapshot and not yet re-bound.
    pub fn is_dormant(&self) -> bool {
        !self.is_bound() && self.status.is_live()
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        if self.status != status {
            debug!(title = %self.title, from = %self.status, to = %status, "status change");
            self.status = status;
            self.updated_at = Utc::now();
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Rename before the first start.
    ///
    /// Uniqueness is checked by the owning [`InstanceRegistry`](crate::InstanceRegistry).
    pub fn set_title(&mut self, title: &str) -> Result<(), SquadError> {
        if self.status != Status::NotStarted {
            return Err(self.invalid_state("rename"));
        }
        validate_title(title)?;
        self.title = title.to_string();
        Ok(())
    }

    /// Provision worktree and session (`first_run`), or re-bind a dormant
    /// instance to the ones it left running.
    ///
    /// On failure nothing provisioned by this call is left behind.
    pub fn start(&mut self, first_run: bool) -> Result<(), SquadError> {
        if first_run {
            self.start_fresh()
        } else {
            self.rebind()
        }
    }

    fn start_fresh(&mut self) -> Result<(), SquadError> {
        if self.status != Status::NotStarted {
            return Err(self.invalid_state("start"));
        }
        if self.title.trim().is_empty() {
            return Err(SquadError::InvalidTitle {
                title: self.title.clone(),
                reason: "title cannot be empty".to_string(),
            });
        }

        let mut worktree = self.backend.worktree(&self.base_path, &self.title, None);
        worktree.setup().map_err(|e| self.provision_err(e))?;

        let mut session = self.backend.session(&self.title);
        if let Err(err) = session.start(&self.program, worktree.path()) {
            if let Err(cleanup) = worktree.cleanup() {
                warn!(title = %self.title, error = %cleanup, "failed to clean up worktree after session start failure");
            }
            return Err(self.provision_err(err));
        }

        self.branch = worktree.branch().to_string();
        self.base_commit = worktree.base_commit().map(str::to_string);
        self.session = Some(session);
        self.worktree = Some(worktree);
        self.set_status(Status::Running);
        info!(title = %self.title, branch = %self.branch, "instance started");
        Ok(())
    }

    fn rebind(&mut self) -> Result<(), SquadError> {
        match self.status {
            Status::NotStarted | Status::Killed => return Err(self.invalid_state("restore")),
            Status::Paused => return Ok(()),
            Status::Running | Status::Ready if self.is_bound() => return Ok(()),
            Status::Running | Status::Ready => {}
        }

        let worktree = self.worktree_handle();
        if !worktree.exists() {
            return Err(self.provision_err(ProviderError::WorktreeMissing(
                worktree.path().to_path_buf(),
            )));
        }
        let mut session = self.backend.session(&self.title);
        session
            .restore(&self.program)
            .map_err(|e| self.provision_err(e))?;

        self.session = Some(session);
        self.worktree = Some(worktree);
        debug!(title = %self.title, "instance re-bound");
        Ok(())
    }

    /// Commit outstanding work, free the working directory, kill the session.
    ///
    /// Rejected with `Conflict` while the branch is checked out in the base
    /// repository. The check and the detach are not atomic: an operator
    /// checking out the branch in between is not detected.
    ///
    /// On failure the instance stays live and bound. The pause commit is
    /// kept on the branch if a later step fails; it only records work that
    /// was already there.
    pub fn pause(&mut self) -> Result<(), SquadError> {
        if !self.status.is_live() {
            return Err(self.invalid_state("pause"));
        }
        let mut worktree = self.worktree_handle();
        let result = self.pause_with(&mut *worktree);
        if result.is_err() {
            self.worktree = Some(worktree);
        }
        result
    }

    fn pause_with(&mut self, worktree: &mut dyn Worktree) -> Result<(), SquadError> {
        self.guard_checked_out(worktree)?;

        let mut detached = false;
        if worktree.exists() {
            match worktree.diff() {
                Ok(stats) => self.diff_stats = stats,
                Err(err) => debug!(title = %self.title, error = %err, "diff before pause failed"),
            }
            let message = format!(
                "[squad] paused '{}' on {}",
                self.title,
                Utc::now().to_rfc2822()
            );
            worktree
                .commit(&message)
                .map_err(|e| self.worktree_err(e))?;
            worktree.detach().map_err(|e| self.worktree_err(e))?;
            detached = true;
        }

        let bound = self.session.take();
        let had_session = bound.is_some();
        let mut session = bound.unwrap_or_else(|| self.backend.session(&self.title));
        if let Err(err) = session.close() {
            let failure = self.session_err(err);
            if detached {
                if let Err(err) = worktree.reattach() {
                    warn!(title = %self.title, error = %err, "failed to restore worktree after failed pause");
                }
            }
            if had_session {
                self.session = Some(session);
            }
            return Err(failure);
        }
        self.set_status(Status::Paused);
        info!(title = %self.title, branch = %self.branch, "instance paused");
        Ok(())
    }

    /// Recreate the working directory from the preserved branch and start a
    /// fresh session. Also re-binds a dormant instance, re-provisioning
    /// whichever half is missing.
    pub fn resume(&mut self) -> Result<(), SquadError> {
        let dormant = self.is_dormant();
        if self.status != Status::Paused && !dormant {
            return Err(self.invalid_state("resume"));
        }

        let mut worktree = self.worktree_handle();
        self.guard_checked_out(&*worktree)?;
        let existed = worktree.exists();
        worktree.reattach().map_err(|e| self.provision_err(e))?;

        let mut session = self.backend.session(&self.title);
        let bound = if session.exists() {
            session.restore(&self.program)
        } else {
            session.start(&self.program, worktree.path())
        };
        if let Err(err) = bound {
            if !existed {
                if let Err(detach) = worktree.detach() {
                    warn!(title = %self.title, error = %detach, "failed to detach worktree after resume failure");
                }
            }
            return Err(self.provision_err(err));
        }

        self.base_commit = worktree.base_commit().map(str::to_string);
        self.session = Some(session);
        self.worktree = Some(worktree);
        if !dormant {
            self.set_status(Status::Running);
        }
        info!(title = %self.title, branch = %self.branch, "instance resumed");
        Ok(())
    }

    /// Destroy session, worktree and branch. Irrevocable.
    ///
    /// Subject to the same checked-out guard as [`pause`](Self::pause).
    /// Removing the persisted record is the caller's job.
    pub fn kill(&mut self) -> Result<(), SquadError> {
        match self.status {
            Status::Killed => return Err(self.invalid_state("kill")),
            Status::NotStarted => {
                self.set_status(Status::Killed);
                return Ok(());
            }
            _ => {}
        }

        let mut worktree = self.worktree_handle();
        if let Err(err) = self.guard_checked_out(&*worktree) {
            self.worktree = Some(worktree);
            return Err(err);
        }

        let mut session = self
            .session
            .take()
            .unwrap_or_else(|| self.backend.session(&self.title));
        if let Err(err) = session.close() {
            let err = self.session_err(err);
            self.session = Some(session);
            self.worktree = Some(worktree);
            return Err(err);
        }
        if let Err(err) = worktree.cleanup() {
            // The session is gone; keep the worktree handle so kill can be retried.
            let err = self.worktree_err(err);
            self.worktree = Some(worktree);
            return Err(err);
        }

        self.set_status(Status::Killed);
        info!(title = %self.title, "instance killed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Session interaction
    // -----------------------------------------------------------------------

    /// Type `text` into the session, followed by Enter.
    pub fn send_prompt(&mut self, text: &str) -> Result<(), SquadError> {
        let title = self.title.clone();
        let session = self.active_session("send a prompt to")?;
        session.send_keys(text).map_err(|e| SquadError::Session {
            title,
            detail: e.to_string(),
        })?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether output changed since the previous call, and whether a
    /// confirmation prompt is on screen. Does not change the status.
    pub fn has_updated(&mut self) -> Result<(bool, bool), SquadError> {
        let title = self.title.clone();
        let session = self.active_session("probe")?;
        let Probe {
            changed,
            awaiting_confirmation,
        } = session.probe().map_err(|e| SquadError::Probe {
            title,
            detail: e.to_string(),
        })?;
        Ok((changed, awaiting_confirmation))
    }

    /// Press Enter to accept a pending prompt. A no-op unless auto-yes is set.
    pub fn tap_enter(&mut self) -> Result<(), SquadError> {
        if !self.auto_yes {
            return Ok(());
        }
        let title = self.title.clone();
        let session = self.active_session("confirm a prompt in")?;
        session.tap_enter().map_err(|e| SquadError::Session {
            title: title.clone(),
            detail: e.to_string(),
        })?;
        debug!(title = %title, "auto-confirmed prompt");
        Ok(())
    }

    /// Current session output.
    pub fn preview(&self) -> Result<String, SquadError> {
        let session = match (&self.session, self.status.is_live()) {
            (Some(session), true) => session,
            _ => return Err(self.invalid_state("preview")),
        };
        session.capture().map_err(|e| SquadError::Session {
            title: self.title.clone(),
            detail: e.to_string(),
        })
    }

    /// Whether the bound session is still running. False when unbound.
    pub fn session_alive(&self) -> bool {
        self.session.as_ref().map(|s| s.exists()).unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Worktree interaction
    // -----------------------------------------------------------------------

    /// Recompute `diff_stats` from the worktree.
    pub fn update_diff_stats(&mut self) -> Result<(), SquadError> {
        let stats = match (&self.worktree, self.status.is_live()) {
            (Some(worktree), true) => worktree.diff().map_err(|e| self.worktree_err(e))?,
            _ => {
                return Err(SquadError::Worktree {
                    title: self.title.clone(),
                    detail: format!("no worktree while {}", self.status),
                })
            }
        };
        self.diff_stats = stats;
        Ok(())
    }

    /// Default commit message of [`push_changes`](Self::push_changes).
    pub fn default_push_message(&self) -> String {
        format!(
            "[squad] update from '{}' on {}",
            self.title,
            Utc::now().to_rfc2822()
        )
    }

    /// Commit outstanding edits and publish the branch. Safe to repeat.
    pub fn push_changes(&mut self, message: &str, include_untracked: bool) -> Result<(), SquadError> {
        if !self.status.is_live() {
            return Err(self.invalid_state("push"));
        }
        let title = self.title.clone();
        let worktree = self.worktree.as_mut().ok_or_else(|| SquadError::Push {
            title: title.clone(),
            detail: "instance is not bound to a worktree".to_string(),
        })?;
        worktree
            .push(message, include_untracked)
            .map_err(|e| SquadError::Push {
                title: title.clone(),
                detail: e.to_string(),
            })?;
        info!(title = %title, "changes pushed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn active_session(&mut self, op: &'static str) -> Result<&mut Box<dyn Session>, SquadError> {
        if !self.status.is_live() || self.session.is_none() {
            return Err(self.invalid_state(op));
        }
        let title = self.title.clone();
        self.session
            .as_mut()
            .ok_or(SquadError::NotFound(title))
    }

    /// The bound worktree, or a fresh handle onto the preserved branch.
    fn worktree_handle(&mut self) -> Box<dyn Worktree> {
        match self.worktree.take() {
            Some(worktree) => worktree,
            None => self.backend.worktree(
                &self.base_path,
                &self.title,
                Some(WorktreeRef {
                    branch: self.branch.clone(),
                    base_commit: self.base_commit.clone(),
                }),
            ),
        }
    }

    fn guard_checked_out(&self, worktree: &dyn Worktree) -> Result<(), SquadError> {
        let checked_out = worktree
            .is_branch_checked_out()
            .map_err(|e| self.worktree_err(e))?;
        if checked_out {
            return Err(SquadError::Conflict {
                title: self.title.clone(),
                branch: worktree.branch().to_string(),
            });
        }
        Ok(())
    }

    fn invalid_state(&self, op: &'static str) -> SquadError {
        SquadError::InvalidState {
            op,
            title: self.title.clone(),
            status: self.status,
        }
    }

    fn provision_err(&self, err: ProviderError) -> SquadError {
        SquadError::Provision {
            title: self.title.clone(),
            detail: err.to_string(),
        }
    }

    fn worktree_err(&self, err: ProviderError) -> SquadError {
        SquadError::Worktree {
            title: self.title.clone(),
            detail: err.to_string(),
        }
    }

    fn session_err(&self, err: ProviderError) -> SquadError {
        SquadError::Session {
            title: self.title.clone(),
            detail: err.to_string(),
        }
    }
}
