//! Application context.
//!
//! Constructed once at startup and passed to whoever needs a module manager.
//! It keeps exactly one [`ModuleManager`] per project root for as long as
//! the project is open.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::manager::ModuleManager;
use crate::project::ProjectHandle;
use crate::sink::Collaborators;

#[derive(Default)]
struct Registry {
    managers: FxHashMap<PathBuf, Arc<ModuleManager>>,
    shut_down: bool,
}

pub struct AppContext {
    /// Overrides each project's own worker configuration when set.
    worker: Option<WorkerConfig>,
    collaborators: Collaborators,
    registry: Mutex<Registry>,
}

impl AppContext {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            worker: None,
            collaborators,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Use `worker` for every project instead of its configured worker.
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The manager for `project`, created on first request. Later requests
    /// for the same root return the same instance.
    pub fn manager_for(&self, project: &ProjectHandle) -> Result<Arc<ModuleManager>> {
        let mut registry = self.registry();
        if registry.shut_down {
            return Err(Error::IllegalState("application context is shut down".to_string()));
        }
        if let Some(manager) = registry.managers.get(project.root()) {
            return Ok(manager.clone());
        }

        let worker = self
            .worker
            .clone()
            .unwrap_or_else(|| project.config().worker.clone());
        tracing::debug!("Opening module manager for {}", project.root().display());
        let manager = Arc::new(ModuleManager::new(project.clone(), worker, self.collaborators.clone()));
        registry
            .managers
            .insert(project.root().to_path_buf(), manager.clone());
        Ok(manager)
    }

    /// Open the project at `root` and return its manager.
    pub fn open(&self, root: impl AsRef<Path>) -> Result<Arc<ModuleManager>> {
        let project = ProjectHandle::open(root)?;
        self.manager_for(&project)
    }

    /// Forget a project, cancelling its running update. Returns false when
    /// the project was not open.
    pub fn close_project(&self, root: &Path) -> bool {
        let removed = self.registry().managers.remove(root);
        match removed {
            Some(manager) => {
                manager.cancel_handle().cancel();
                true
            }
            None => false,
        }
    }

    pub fn open_projects(&self) -> usize {
        self.registry().managers.len()
    }

    /// Cancel every running update and drop all managers.
    pub fn shutdown(&self) {
        let managers: Vec<_> = {
            let mut registry = self.registry();
            registry.shut_down = true;
            registry.managers.drain().map(|(_, m)| m).collect()
        };
        for manager in managers {
            manager.cancel_handle().cancel();
        }
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
