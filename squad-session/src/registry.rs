//! Ordered instance collection with unique titles and a selection cursor.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use squad_core::{validate_title, InstanceSnapshot, SquadError, Status, GLOBAL_INSTANCE_LIMIT};

use crate::backend::Backend;
use crate::instance::Instance;

/// An instance shared between the registry and polling workers.
pub type SharedInstance = Arc<Mutex<Instance>>;

/// Lock an instance, recovering from a poisoned mutex.
///
/// A panic inside one provider call must not make the instance unreachable.
pub fn lock(instance: &SharedInstance) -> MutexGuard<'_, Instance> {
    instance
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One polling target: the title is cached so it can be reported without
/// taking the instance lock.
#[derive(Clone)]
pub struct PollTarget {
    pub title: String,
    pub instance: SharedInstance,
}

struct Entry {
    title: String,
    instance: SharedInstance,
}

pub struct InstanceRegistry {
    entries: Vec<Entry>,
    selected: usize,
    limit: usize,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(GLOBAL_INSTANCE_LIMIT)
    }
}

impl InstanceRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            selected: 0,
            limit,
        }
    }

    /// Rebuild from persisted snapshots. Every instance comes back dormant.
    ///
    /// Killed records and duplicate titles are skipped with a warning.
    pub fn from_snapshots(
        backend: Arc<dyn Backend>,
        snapshots: Vec<InstanceSnapshot>,
        limit: usize,
    ) -> Self {
        let mut registry = Self::new(limit);
        for snapshot in snapshots {
            if snapshot.status == Status::Killed {
                continue;
            }
            if registry.position(&snapshot.title).is_some() {
                warn!(title = %snapshot.title, "duplicate instance record ignored");
                continue;
            }
            let instance = Instance::from_snapshot(snapshot, Arc::clone(&backend));
            registry.entries.push(Entry {
                title: instance.title().to_string(),
                instance: Arc::new(Mutex::new(instance)),
            });
        }
        registry
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn titles(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.title.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedInstance> {
        self.entries.iter().map(|e| &e.instance)
    }

    /// Free slots: every recorded instance, paused ones included, holds one.
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.entries.len())
    }

    /// Instances whose status is `Running` or `Ready`, dormant ones included.
    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| lock(&e.instance).status().is_live())
            .count()
    }

    /// Add an instance at the end. Titles must be unique and the registry
    /// holds at most `limit` instances.
    pub fn add(&mut self, instance: Instance) -> Result<SharedInstance, SquadError> {
        let shared = Arc::new(Mutex::new(instance));
        self.adopt(Arc::clone(&shared))?;
        Ok(shared)
    }

    /// [`add`](Self::add) for an instance that is already shared, such as
    /// one carried over from a previous registry.
    pub fn adopt(&mut self, instance: SharedInstance) -> Result<(), SquadError> {
        if self.entries.len() >= self.limit {
            return Err(SquadError::CapacityExhausted { limit: self.limit });
        }
        let title = lock(&instance).title().to_string();
        if self.position(&title).is_some() {
            return Err(SquadError::Provision {
                title: title.clone(),
                detail: format!("an instance titled '{title}' already exists"),
            });
        }
        self.entries.push(Entry { title, instance });
        Ok(())
    }

    pub fn get(&self, title: &str) -> Option<SharedInstance> {
        self.entries
            .iter()
            .find(|e| e.title == title)
            .map(|e| Arc::clone(&e.instance))
    }

    pub fn position(&self, title: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.title == title)
    }

    /// Rename an unstarted instance, keeping titles unique.
    pub fn rename(&mut self, title: &str, new_title: &str) -> Result<(), SquadError> {
        validate_title(new_title)?;
        let index = self
            .position(title)
            .ok_or_else(|| SquadError::NotFound(title.to_string()))?;
        if title != new_title && self.position(new_title).is_some() {
            return Err(SquadError::InvalidTitle {
                title: new_title.to_string(),
                reason: "another instance already uses this title".to_string(),
            });
        }
        lock(&self.entries[index].instance).set_title(new_title)?;
        self.entries[index].title = new_title.to_string();
        Ok(())
    }

    /// Drop an instance from the registry without touching its resources.
    pub fn remove(&mut self, title: &str) -> Option<SharedInstance> {
        let index = self.position(title)?;
        let entry = self.entries.remove(index);
        if index < self.selected {
            self.selected -= 1;
        } else if self.selected >= self.entries.len() {
            self.selected = self.entries.len().saturating_sub(1);
        }
        Some(entry.instance)
    }

    /// Kill an instance and remove it. On failure it stays registered, unchanged.
    pub fn kill(&mut self, title: &str) -> Result<(), SquadError> {
        let instance = self
            .get(title)
            .ok_or_else(|| SquadError::NotFound(title.to_string()))?;
        lock(&instance).kill()?;
        self.remove(title);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Selection cursor
    // -----------------------------------------------------------------------

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected(&self) -> Option<SharedInstance> {
        self.entries
            .get(self.selected)
            .map(|e| Arc::clone(&e.instance))
    }

    /// Move the cursor; out-of-range indices clamp to the last instance.
    pub fn select(&mut self, index: usize) {
        self.selected = index.min(self.entries.len().saturating_sub(1));
    }

    pub fn up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn down(&mut self) {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Persistence and polling
    // -----------------------------------------------------------------------

    /// Snapshots in registry order, for the persistence collaborator.
    pub fn snapshots(&self) -> Vec<InstanceSnapshot> {
        self.entries
            .iter()
            .map(|e| lock(&e.instance).snapshot())
            .collect()
    }

    pub fn poll_targets(&self) -> Vec<PollTarget> {
        self.entries
            .iter()
            .map(|e| PollTarget {
                title: e.title.clone(),
                instance: Arc::clone(&e.instance),
            })
            .collect()
    }
}
