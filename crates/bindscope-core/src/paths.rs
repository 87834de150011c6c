//! Project directory management.
//!
//! Provides the directory layout bindscope uses inside a project, so the
//! CLI and library agree on where configuration lives.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Name of the per-project bindscope directory.
pub const BINDSCOPE_DIR: &str = ".bindscope";

/// Directory structure for a bindscope project.
///
/// ```text
/// project/
/// .bindscope/
/// ├── project.json   # ProjectConfig
/// └── contexts/      # *.context.json custom module contexts
/// ```
#[derive(Debug, Clone)]
pub struct ProjectDirs {
    /// The `.bindscope` directory itself.
    pub bindscope_dir: PathBuf,

    /// Project configuration file.
    pub config_path: PathBuf,

    /// Custom context definitions.
    pub contexts_dir: PathBuf,
}

impl ProjectDirs {
    /// Compute the layout for a project root without touching the filesystem.
    pub fn locate(project_root: &Path) -> Self {
        let bindscope_dir = project_root.join(BINDSCOPE_DIR);
        Self {
            config_path: bindscope_dir.join("project.json"),
            contexts_dir: bindscope_dir.join("contexts"),
            bindscope_dir,
        }
    }

    /// Compute the layout and create the directories.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn create(project_root: &Path) -> Result<Self> {
        let dirs = Self::locate(project_root);
        fs::create_dir_all(&dirs.contexts_dir)?;
        Ok(dirs)
    }
}
