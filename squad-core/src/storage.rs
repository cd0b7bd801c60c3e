//! Instance snapshot persistence.
//!
//! # Storage layout
//!
//! ```text
//! ~/.squad/
//!   instances.yaml   (snapshot list: mode 0600)
//!   config.yaml      (see [`crate::config`])
//!   worktrees/       (one directory per started instance)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::types::InstanceSnapshot;

/// Current on-disk format version of `instances.yaml`.
pub const STORAGE_VERSION: u32 = 1;

/// Root document of `instances.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancesFile {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub instances: Vec<InstanceSnapshot>,
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.squad/`
pub fn squad_root(home: &Path) -> PathBuf {
    home.join(".squad")
}

/// `<home>/.squad/`: created with mode `0700` if absent.
pub fn ensure_root_at(home: &Path) -> Result<PathBuf, StorageError> {
    let dir = squad_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.squad/instances.yaml`: pure, no I/O.
pub fn instances_path_at(home: &Path) -> PathBuf {
    squad_root(home).join("instances.yaml")
}

/// `<home>/.squad/worktrees/`: pure, no I/O.
pub fn worktrees_dir_at(home: &Path) -> PathBuf {
    squad_root(home).join("worktrees")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load every persisted snapshot, in registry order.
///
/// A missing file is an empty registry, not an error.
/// Returns `StorageError::Parse` (with path + line context) if malformed YAML.
pub fn load_instances_at(home: &Path) -> Result<Vec<InstanceSnapshot>, StorageError> {
    let path = instances_path_at(home);
    if !path.exists() {
        return Ok(vec![]);
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(vec![]);
    }
    let file: InstancesFile =
        serde_yaml::from_str(&contents).map_err(|e| StorageError::Parse { path, source: e })?;
    Ok(file.instances)
}

/// `load_instances_at` convenience wrapper.
pub fn load_instances() -> Result<Vec<InstanceSnapshot>, StorageError> {
    load_instances_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically replace the snapshot list.
///
/// Write flow: serialize → `instances.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_instances_at(home: &Path, instances: &[InstanceSnapshot]) -> Result<(), StorageError> {
    ensure_root_at(home)?;
    let file = InstancesFile {
        version: STORAGE_VERSION,
        updated_at: Utc::now(),
        instances: instances.to_vec(),
    };
    let yaml = serde_yaml::to_string(&file)?;
    write_atomic(&instances_path_at(home), &yaml)
}

/// `save_instances_at` convenience wrapper.
pub fn save_instances(instances: &[InstanceSnapshot]) -> Result<(), StorageError> {
    save_instances_at(&home()?, instances)
}

// ---------------------------------------------------------------------------
// 4. Delete
// ---------------------------------------------------------------------------

/// Remove the snapshot titled `title`. Returns whether a record was removed.
pub fn delete_instance_at(home: &Path, title: &str) -> Result<bool, StorageError> {
    let mut instances = load_instances_at(home)?;
    let before = instances.len();
    instances.retain(|snapshot| snapshot.title != title);
    if instances.len() == before {
        return Ok(false);
    }
    save_instances_at(home, &instances)?;
    Ok(true)
}

/// `delete_instance_at` convenience wrapper.
pub fn delete_instance(title: &str) -> Result<bool, StorageError> {
    delete_instance_at(&home()?, title)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write `contents` to a `.tmp` sibling of `path`, restrict it to `0600`, then rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), StorageError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "squad".to_string());
    let tmp_path = path.with_file_name(format!("{name}.tmp"));
    std::fs::write(&tmp_path, contents)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub(crate) fn home() -> Result<PathBuf, StorageError> {
    dirs::home_dir().ok_or(StorageError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
