//! squad core library: domain types, snapshot persistence, configuration, errors.
//!
//! - [`types`]: instance status, snapshots, tasks and plans, naming rules
//! - [`error`]: [`SquadError`] taxonomy and [`StorageError`]
//! - [`storage`]: load / save / delete instance snapshots
//! - [`config`]: `~/.squad/config.yaml`

pub mod config;
pub mod error;
pub mod storage;
pub mod types;

pub use config::{Config, FailurePolicy, OrchestratorConfig};
pub use error::{SquadError, StorageError};
pub use types::{
    branch_name, session_name, slug, validate_title, DiffStats, InstanceSnapshot, Plan, Status,
    Task, GLOBAL_INSTANCE_LIMIT, MAX_TITLE_LEN,
};
