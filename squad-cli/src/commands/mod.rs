pub mod daemon;
pub mod instance;
pub mod list;
pub mod new;
pub mod orchestrate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use squad_core::config::load_config_at;
use squad_core::storage::{load_instances_at, save_instances_at};
use squad_core::{Config, SquadError};
use squad_session::{lock, Backend, InstanceRegistry, SharedInstance, SystemBackend};

/// Everything a command needs: the home directory, configuration, and the
/// recorded instances rebuilt as a (dormant) registry.
pub struct Workspace {
    pub home: PathBuf,
    pub config: Config,
    pub backend: Arc<dyn Backend>,
    pub registry: InstanceRegistry,
}

impl Workspace {
    pub fn open() -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = load_config_at(&home).context("failed to load ~/.squad/config.yaml")?;
        let backend: Arc<dyn Backend> = Arc::new(SystemBackend::new(&home, &config));
        let snapshots =
            load_instances_at(&home).context("failed to load ~/.squad/instances.yaml")?;
        let registry = InstanceRegistry::from_snapshots(
            Arc::clone(&backend),
            snapshots,
            config.global_instance_limit,
        );
        Ok(Self {
            home,
            config,
            backend,
            registry,
        })
    }

    pub fn instance(&self, title: &str) -> Result<SharedInstance> {
        self.registry
            .get(title)
            .ok_or_else(|| SquadError::NotFound(title.to_string()).into())
    }

    /// Look up `title` and re-bind it if it was left running by an earlier
    /// invocation.
    pub fn bound_instance(&self, title: &str) -> Result<SharedInstance> {
        let instance = self.instance(title)?;
        {
            let mut guard = lock(&instance);
            if guard.is_dormant() {
                guard
                    .start(false)
                    .with_context(|| format!("failed to re-attach to '{title}'"))?;
            }
        }
        Ok(instance)
    }

    pub fn save(&self) -> Result<()> {
        save_instances_at(&self.home, &self.registry.snapshots())
            .context("failed to save ~/.squad/instances.yaml")
    }
}

/// `--path` or the current directory.
pub fn repo_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => std::env::current_dir().context("could not determine current directory"),
    }
}

pub fn display_path(path: &Path) -> String {
    match dirs::home_dir() {
        Some(home) => match path.strip_prefix(&home) {
            Ok(rest) => format!("~/{}", rest.display()),
            Err(_) => path.display().to_string(),
        },
        None => path.display().to_string(),
    }
}
