//! In-memory [`Backend`] for tests (feature `fake`).
//!
//! Sessions and worktrees live in one shared [`FakeState`]. Typing into a
//! session appends the text to that instance's worktree as `<slug>.txt`, so a
//! worker that was sent a prompt ends up with a non-empty diff.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use squad_core::{branch_name, session_name, slug, DiffStats};

use crate::backend::{Backend, Probe, Session, Worktree, WorktreeRef};
use crate::error::ProviderError;

const FAKE_BASE_COMMIT: &str = "0000000000000000000000000000000000000000";

/// Per-title behaviour knobs.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Number of probes that report changed output after each prompt.
    pub busy_probes: usize,
    /// Sleep inside every probe.
    pub probe_delay: Option<Duration>,
    /// Make `Session::start` fail.
    pub fail_start: bool,
    /// Make every probe fail.
    pub fail_probe: bool,
    /// Make `Session::close` fail and leave the session running.
    pub fail_close: bool,
    /// Make `Worktree::diff` fail.
    pub fail_diff: bool,
    /// Show a confirmation prompt until Enter is tapped.
    pub prompt_pending: bool,
    /// Prompts are typed but never written to the worktree.
    pub no_changes: bool,
}

#[derive(Debug, Default)]
struct FakeSessionState {
    title: String,
    output: Vec<String>,
    version: u64,
    busy_left: usize,
    taps: usize,
}

#[derive(Debug, Default, Clone)]
struct FakeTree {
    attached: bool,
    files: BTreeMap<String, String>,
    committed: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FakeState {
    sessions: HashMap<String, FakeSessionState>,
    trees: HashMap<String, FakeTree>,
    /// title → branch, recorded when a worktree is set up or reattached.
    branches_by_title: HashMap<String, String>,
    checked_out: Option<String>,
    scripts: HashMap<String, Script>,
    pushes: Vec<(String, String)>,
    max_live_sessions: usize,
}

impl FakeState {
    fn live_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    branch_prefix: String,
}

fn lock(state: &Arc<Mutex<FakeState>>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            branch_prefix: "squad/".to_string(),
        }
    }

    pub fn script(&self, title: &str, script: Script) {
        lock(&self.state).scripts.insert(title.to_string(), script);
    }

    /// Simulate the operator checking out `branch` in the base repository.
    pub fn set_checked_out(&self, branch: Option<&str>) {
        lock(&self.state).checked_out = branch.map(str::to_string);
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        lock(&self.state).trees.contains_key(branch)
    }

    pub fn worktree_attached(&self, branch: &str) -> bool {
        lock(&self.state)
            .trees
            .get(branch)
            .map(|t| t.attached)
            .unwrap_or(false)
    }

    pub fn session_exists(&self, title: &str) -> bool {
        lock(&self.state).sessions.contains_key(&session_name(title))
    }

    /// Kill a session behind squad's back.
    pub fn drop_session(&self, title: &str) {
        lock(&self.state).sessions.remove(&session_name(title));
    }

    pub fn live_sessions(&self) -> usize {
        lock(&self.state).live_sessions()
    }

    /// Highest number of simultaneously running sessions ever observed.
    pub fn max_live_sessions(&self) -> usize {
        lock(&self.state).max_live_sessions
    }

    /// Edit a file in the worktree of `branch`, as an agent would.
    pub fn write_file(&self, branch: &str, file: &str, content: &str) {
        if let Some(tree) = lock(&self.state).trees.get_mut(branch) {
            tree.files.insert(file.to_string(), content.to_string());
        }
    }

    /// Working-copy files of `branch` (committed content when detached).
    pub fn files(&self, branch: &str) -> BTreeMap<String, String> {
        lock(&self.state)
            .trees
            .get(branch)
            .map(|t| if t.attached { t.files.clone() } else { t.committed.clone() })
            .unwrap_or_default()
    }

    pub fn committed(&self, branch: &str) -> BTreeMap<String, String> {
        lock(&self.state)
            .trees
            .get(branch)
            .map(|t| t.committed.clone())
            .unwrap_or_default()
    }

    /// `(branch, message)` of every push so far.
    pub fn pushes(&self) -> Vec<(String, String)> {
        lock(&self.state).pushes.clone()
    }

    pub fn taps(&self, title: &str) -> usize {
        lock(&self.state)
            .sessions
            .get(&session_name(title))
            .map(|s| s.taps)
            .unwrap_or(0)
    }

    /// Everything typed into the session of `title`.
    pub fn typed(&self, title: &str) -> Vec<String> {
        lock(&self.state)
            .sessions
            .get(&session_name(title))
            .map(|s| s.output.clone())
            .unwrap_or_default()
    }
}

impl Backend for FakeBackend {
    fn session(&self, title: &str) -> Box<dyn Session> {
        Box::new(FakeSession {
            name: session_name(title),
            title: title.to_string(),
            seen: None,
            state: Arc::clone(&self.state),
        })
    }

    fn worktree(
        &self,
        base_path: &Path,
        title: &str,
        existing: Option<WorktreeRef>,
    ) -> Box<dyn Worktree> {
        let (branch, base_commit) = match existing {
            Some(r) => (r.branch, r.base_commit),
            None => (branch_name(&self.branch_prefix, title), None),
        };
        Box::new(FakeWorktree {
            title: title.to_string(),
            path: base_path.join(".squad-fake").join(slug(title)),
            branch,
            base_commit,
            state: Arc::clone(&self.state),
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct FakeSession {
    name: String,
    title: String,
    seen: Option<u64>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeSession {
    fn script(&self) -> Script {
        lock(&self.state)
            .scripts
            .get(&self.title)
            .cloned()
            .unwrap_or_default()
    }

    fn missing(&self) -> ProviderError {
        ProviderError::SessionMissing(self.name.clone())
    }
}

impl Session for FakeSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        lock(&self.state).sessions.contains_key(&self.name)
    }

    fn start(&mut self, _program: &str, _workdir: &Path) -> Result<(), ProviderError> {
        let script = self.script();
        let mut state = lock(&self.state);
        if script.fail_start || state.sessions.contains_key(&self.name) {
            return Err(ProviderError::CommandFailed {
                command: format!("tmux new-session -s {}", self.name),
                detail: format!("duplicate session: {}", self.name),
            });
        }
        state.sessions.insert(
            self.name.clone(),
            FakeSessionState {
                title: self.title.clone(),
                ..Default::default()
            },
        );
        state.max_live_sessions = state.max_live_sessions.max(state.live_sessions());
        self.seen = None;
        Ok(())
    }

    fn restore(&mut self, _program: &str) -> Result<(), ProviderError> {
        if !self.exists() {
            return Err(self.missing());
        }
        self.seen = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        if self.script().fail_close {
            return Err(ProviderError::CommandFailed {
                command: format!("tmux kill-session -t ={}", self.name),
                detail: "server exited unexpectedly".to_string(),
            });
        }
        lock(&self.state).sessions.remove(&self.name);
        Ok(())
    }

    fn probe(&mut self) -> Result<Probe, ProviderError> {
        let script = self.script();
        if let Some(delay) = script.probe_delay {
            std::thread::sleep(delay);
        }
        if script.fail_probe {
            return Err(ProviderError::CommandFailed {
                command: format!("tmux capture-pane -t {}", self.name),
                detail: "scripted probe failure".to_string(),
            });
        }
        let mut state = lock(&self.state);
        let session = state.sessions.get_mut(&self.name).ok_or_else(|| {
            ProviderError::SessionMissing(self.name.clone())
        })?;
        if session.busy_left > 0 {
            session.busy_left -= 1;
            session.version += 1;
        }
        let changed = self.seen != Some(session.version);
        self.seen = Some(session.version);
        let awaiting_confirmation = script.prompt_pending && session.taps == 0;
        Ok(Probe {
            changed,
            awaiting_confirmation,
        })
    }

    fn capture(&self) -> Result<String, ProviderError> {
        lock(&self.state)
            .sessions
            .get(&self.name)
            .map(|s| s.output.join("\n"))
            .ok_or_else(|| self.missing())
    }

    fn send_keys(&mut self, text: &str) -> Result<(), ProviderError> {
        let script = self.script();
        let mut state = lock(&self.state);
        let branch = state.branches_by_title.get(&self.title).cloned();
        let session = state
            .sessions
            .get_mut(&self.name)
            .ok_or_else(|| ProviderError::SessionMissing(self.name.clone()))?;
        session.output.push(text.to_string());
        session.version += 1;
        session.busy_left = script.busy_probes;
        let title = session.title.clone();

        if script.no_changes {
            return Ok(());
        }
        let tree = match branch {
            Some(branch) => state.trees.get_mut(&branch),
            None => None,
        };
        if let Some(tree) = tree {
            if tree.attached {
                let file = format!("{}.txt", slug(&title));
                let entry = tree.files.entry(file).or_default();
                for line in text.lines() {
                    entry.push_str(line);
                    entry.push('\n');
                }
            }
        }
        Ok(())
    }

    fn tap_enter(&mut self) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        let session = state
            .sessions
            .get_mut(&self.name)
            .ok_or_else(|| ProviderError::SessionMissing(self.name.clone()))?;
        session.taps += 1;
        session.version += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Worktree
// ---------------------------------------------------------------------------

struct FakeWorktree {
    title: String,
    path: PathBuf,
    branch: String,
    base_commit: Option<String>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeWorktree {
    fn missing(&self) -> ProviderError {
        ProviderError::WorktreeMissing(self.path.clone())
    }
}

impl Worktree for FakeWorktree {
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
        let mut state = lock(&self.state);
        if state.trees.contains_key(&self.branch) {
            return Err(ProviderError::CommandFailed {
                command: format!("git worktree add -b {}", self.branch),
                detail: format!("branch '{}' already exists", self.branch),
            });
        }
        state.trees.insert(
            self.branch.clone(),
            FakeTree {
                attached: true,
                ..Default::default()
            },
        );
        state
            .branches_by_title
            .insert(self.title.clone(), self.branch.clone());
        self.base_commit = Some(FAKE_BASE_COMMIT.to_string());
        Ok(())
    }

    fn reattach(&mut self) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        let tree = state.trees.get_mut(&self.branch).ok_or_else(|| {
            ProviderError::CommandFailed {
                command: format!("git worktree add {}", self.path.display()),
                detail: format!("branch '{}' no longer exists", self.branch),
            }
        })?;
        if !tree.attached {
            tree.files = tree.committed.clone();
            tree.attached = true;
        }
        state
            .branches_by_title
            .insert(self.title.clone(), self.branch.clone());
        if self.base_commit.is_none() {
            self.base_commit = Some(FAKE_BASE_COMMIT.to_string());
        }
        Ok(())
    }

    fn exists(&self) -> bool {
        lock(&self.state)
            .trees
            .get(&self.branch)
            .map(|t| t.attached)
            .unwrap_or(false)
    }

    fn is_branch_checked_out(&self) -> Result<bool, ProviderError> {
        Ok(lock(&self.state).checked_out.as_deref() == Some(self.branch.as_str()))
    }

    fn commit(&mut self, _message: &str) -> Result<bool, ProviderError> {
        let mut state = lock(&self.state);
        let tree = state
            .trees
            .get_mut(&self.branch)
            .filter(|t| t.attached)
            .ok_or_else(|| ProviderError::WorktreeMissing(self.path.clone()))?;
        if tree.files == tree.committed {
            return Ok(false);
        }
        tree.committed = tree.files.clone();
        Ok(true)
    }

    fn push(&mut self, message: &str, _include_untracked: bool) -> Result<(), ProviderError> {
        self.commit(message)?;
        lock(&self.state)
            .pushes
            .push((self.branch.clone(), message.to_string()));
        Ok(())
    }

    fn detach(&mut self) -> Result<(), ProviderError> {
        if let Some(tree) = lock(&self.state).trees.get_mut(&self.branch) {
            tree.attached = false;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        state.trees.remove(&self.branch);
        state.branches_by_title.remove(&self.title);
        Ok(())
    }

    fn diff(&self) -> Result<DiffStats, ProviderError> {
        let fail = lock(&self.state)
            .scripts
            .get(&self.title)
            .map(|s| s.fail_diff)
            .unwrap_or(false);
        if fail {
            return Err(ProviderError::CommandFailed {
                command: "git diff".to_string(),
                detail: "scripted diff failure".to_string(),
            });
        }
        let state = lock(&self.state);
        let tree = state
            .trees
            .get(&self.branch)
            .filter(|t| t.attached)
            .ok_or_else(|| self.missing())?;
        let mut out = String::new();
        for (file, content) in &tree.files {
            let lines: Vec<&str> = content.lines().collect();
            out.push_str(&format!(
                "diff --git a/{file} b/{file}\nnew file mode 100644\n--- /dev/null\n+++ b/{file}\n@@ -0,0 +1,{} @@\n",
                lines.len()
            ));
            for line in lines {
                out.push('+');
                out.push_str(line);
                out.push('\n');
            }
        }
        Ok(DiffStats::from_diff(out))
    }
}
