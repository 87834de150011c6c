//! Project handles.

use std::path::{Path, PathBuf};

use crate::config::ProjectConfig;
use crate::error::{Error, Result};
use crate::paths::ProjectDirs;

/// A project opened for binding resolution. Identity is the root path.
#[derive(Debug, Clone)]
pub struct ProjectHandle {
    name: String,
    root: PathBuf,
    config: ProjectConfig,
}

impl ProjectHandle {
    /// Open the project rooted at `root`, loading `.bindscope/project.json`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| {
            Error::Config(format!("cannot open project {}: {}", root.display(), e))
        })?;
        if !root.is_dir() {
            return Err(Error::Config(format!("{} is not a directory", root.display())));
        }
        let config = ProjectConfig::load(&root)?;
        Ok(Self::with_config(root, config))
    }

    /// Handle with an explicit configuration; nothing is read from disk.
    pub fn with_config(root: impl Into<PathBuf>, config: ProjectConfig) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { name, root, config }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn dirs(&self) -> ProjectDirs {
        ProjectDirs::locate(&self.root)
    }

    /// Source roots, resolved against the project root.
    pub fn source_roots(&self) -> Vec<PathBuf> {
        self.config.source_roots.iter().map(|p| self.resolve(p)).collect()
    }

    /// Project classpath, resolved against the project root.
    pub fn classpath(&self) -> Vec<PathBuf> {
        self.config.classpath.iter().map(|p| self.resolve(p)).collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
