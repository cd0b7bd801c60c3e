//! `~/.squad/config.yaml`: every field is optional; a missing file yields defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::{ensure_root_at, home, squad_root, write_atomic};
use crate::types::GLOBAL_INSTANCE_LIMIT;

/// What an orchestrator run does when one worker fails irrecoverably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the other workers running and merge whatever succeeded.
    #[default]
    BestEffort,
    /// Stop every remaining worker and fail the run.
    AbortAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent command used when none is given on the command line.
    pub default_program: String,
    /// Force auto-confirmation on every instance.
    pub auto_yes: bool,
    pub branch_prefix: String,
    pub poll_interval_ms: u64,
    /// Per-instance budget within one polling tick.
    pub probe_timeout_ms: u64,
    pub global_instance_limit: usize,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How long a worker must stay `Ready` without output before it counts as done.
    pub quiet_window_ms: u64,
    /// Deadline for a single worker; `None` waits forever.
    pub worker_timeout_secs: Option<u64>,
    pub failure_policy: FailurePolicy,
    /// Arguments that run the agent in one-shot print mode for planning.
    pub planner_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_program: "claude".to_string(),
            auto_yes: false,
            branch_prefix: "squad/".to_string(),
            poll_interval_ms: 500,
            probe_timeout_ms: 2_000,
            global_instance_limit: GLOBAL_INSTANCE_LIMIT,
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: 5_000,
            worker_timeout_secs: Some(3_600),
            failure_policy: FailurePolicy::BestEffort,
            planner_args: vec!["-p".to_string()],
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}

impl OrchestratorConfig {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }
}

/// `<home>/.squad/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    squad_root(home).join("config.yaml")
}

/// Load the configuration, falling back to defaults when the file is absent.
pub fn load_config_at(home: &Path) -> Result<Config, StorageError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| StorageError::Parse { path, source: e })
}

/// `load_config_at` convenience wrapper.
pub fn load_config() -> Result<Config, StorageError> {
    load_config_at(&home()?)
}

/// Atomically write `config`.
pub fn save_config_at(home: &Path, config: &Config) -> Result<(), StorageError> {
    ensure_root_at(home)?;
    let yaml = serde_yaml::to_string(config)?;
    write_atomic(&config_path_at(home), &yaml)
}
