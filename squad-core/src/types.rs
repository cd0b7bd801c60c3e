//! Domain types shared by every squad crate.
//!
//! All path fields use `PathBuf`; all persisted types are serde-serializable.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SquadError;

/// Longest accepted instance title, in characters.
pub const MAX_TITLE_LEN: usize = 32;

/// Default ceiling on live instances, shared by interactive and orchestrated use.
pub const GLOBAL_INSTANCE_LIMIT: usize = 10;

/// Prefix of every tmux session owned by squad.
pub const SESSION_PREFIX: &str = "squad_";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of an instance.
///
/// `NotStarted → Running ⇄ Ready`, `Running/Ready → Paused ⇄ Running`,
/// `{Running, Ready, Paused} → Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    NotStarted,
    Running,
    Ready,
    Paused,
    Killed,
}

impl Status {
    /// Whether the session is expected to be producing or awaiting output.
    pub fn is_live(self) -> bool {
        matches!(self, Status::Running | Status::Ready)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotStarted => write!(f, "not started"),
            Status::Running => write!(f, "running"),
            Status::Ready => write!(f, "ready"),
            Status::Paused => write!(f, "paused"),
            Status::Killed => write!(f, "killed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff stats
// ---------------------------------------------------------------------------

/// Last observed diff of an instance worktree against its base commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

impl DiffStats {
    /// Count added/removed lines of a unified diff, ignoring file headers.
    ///
    /// `---`/`+++` are headers only between a `diff --git` line and the
    /// first hunk; inside a hunk they are content lines.
    pub fn from_diff(content: impl Into<String>) -> Self {
        let content = content.into();
        let mut added = 0;
        let mut removed = 0;
        let mut in_header = true;
        for line in content.lines() {
            if line.starts_with("diff --git ") {
                in_header = true;
                continue;
            }
            if line.starts_with("@@") {
                in_header = false;
                continue;
            }
            if in_header {
                continue;
            }
            if line.starts_with('+') {
                added += 1;
            } else if line.starts_with('-') {
                removed += 1;
            }
        }
        Self {
            added,
            removed,
            content,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Persisted form of an instance. Carries no live process handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub title: String,
    /// Root of the repository the instance works against.
    pub base_path: PathBuf,
    pub program: String,
    #[serde(default)]
    pub auto_yes: bool,
    #[serde(default)]
    pub status: Status,
    pub branch: String,
    /// Commit the worktree branched from; diffs are computed against it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// An atomic unit of delegated work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Short name; becomes the worker instance title and branch.
    pub name: String,
    /// Full instruction handed to the worker's agent program.
    pub prompt: String,
}

impl Task {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// Ordered, validated sequence of tasks decomposed from one goal.
///
/// Construction guarantees the plan is non-empty, every name is a valid
/// title, and names are pairwise distinct (also after slugging, since they
/// become branch names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Plan {
    tasks: Vec<Task>,
}

impl Plan {
    pub fn new(tasks: Vec<Task>) -> Result<Self, SquadError> {
        if tasks.is_empty() {
            return Err(SquadError::Decomposition("plan contains no tasks".to_string()));
        }
        let mut seen = HashSet::new();
        for (index, task) in tasks.iter().enumerate() {
            let position = index + 1;
            if task.name.trim().is_empty() {
                return Err(SquadError::Decomposition(format!(
                    "task {position} has an empty name"
                )));
            }
            if task.prompt.trim().is_empty() {
                return Err(SquadError::Decomposition(format!(
                    "task {position} ('{}') has an empty prompt",
                    task.name
                )));
            }
            validate_title(&task.name).map_err(|err| {
                SquadError::Decomposition(format!("task {position}: {err}"))
            })?;
            if !seen.insert(slug(&task.name)) {
                return Err(SquadError::Decomposition(format!(
                    "duplicate task name '{}'",
                    task.name
                )));
            }
        }
        Ok(Self { tasks })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}

impl<'de> Deserialize<'de> for Plan {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tasks = Vec::<Task>::deserialize(deserializer)?;
        Plan::new(tasks).map_err(serde::de::Error::custom)
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Reject titles longer than [`MAX_TITLE_LEN`] or containing control characters.
///
/// An empty title is accepted here (it is being typed); `Start` rejects it.
pub fn validate_title(title: &str) -> Result<(), SquadError> {
    let len = title.chars().count();
    if len > MAX_TITLE_LEN {
        return Err(SquadError::InvalidTitle {
            title: title.to_string(),
            reason: format!("title cannot be longer than {MAX_TITLE_LEN} characters (got {len})"),
        });
    }
    if title.chars().any(char::is_control) {
        return Err(SquadError::InvalidTitle {
            title: title.to_string(),
            reason: "title cannot contain control characters".to_string(),
        });
    }
    Ok(())
}

/// Lowercase, branch- and filesystem-safe form of a title.
///
/// Runs of anything other than ASCII alphanumerics, `-` and `_` collapse to a
/// single `-`; leading and trailing dashes are dropped.
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Branch that holds an instance's work: `<prefix><slug>`.
pub fn branch_name(prefix: &str, title: &str) -> String {
    format!("{prefix}{}", slug(title))
}

/// tmux session name: whitespace, dots and colons are not allowed by tmux targets.
pub fn session_name(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || c == '.' || c == ':' {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("{SESSION_PREFIX}{cleaned}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
