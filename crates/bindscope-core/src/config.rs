//! Project and worker configuration.
//!
//! Configuration lives in `.bindscope/project.json`. Every field has a
//! default, so a project without the file still opens.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths::ProjectDirs;

/// Environment variable overriding the worker executable.
pub const WORKER_PATH_ENV: &str = "BINDSCOPE_WORKER_PATH";

const WORKER_NAME: &str = if cfg!(windows) {
    "bindscope-worker.exe"
} else {
    "bindscope-worker"
};

/// How worker processes are launched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable. Resolved automatically when unset.
    pub executable: Option<PathBuf>,
    /// Extra flags passed before the classpath.
    pub flags: Vec<String>,
    /// Runner support library entries, appended after the project classpath.
    pub support_classpath: Vec<PathBuf>,
    /// Injection framework entries, appended last.
    pub framework_classpath: Vec<PathBuf>,
}

impl WorkerConfig {
    /// Config pinned to an explicit executable.
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
            ..Self::default()
        }
    }

    /// Find the worker executable.
    ///
    /// Looks in the following order:
    /// 1. `BINDSCOPE_WORKER_PATH` environment variable
    /// 2. The configured `executable`
    /// 3. Same directory as the current executable
    /// 4. System PATH
    /// 5. `target/{debug,release}` relative to `CARGO_MANIFEST_DIR` (development)
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Some(path) = &self.executable {
            // Explicit paths are used as-is; a bad one surfaces as a launch failure.
            return Ok(path.clone());
        }

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let worker_path = exe_dir.join(WORKER_NAME);
            if worker_path.exists() {
                return Ok(worker_path);
            }
            // Test binaries live in target/<profile>/deps.
            if let Some(profile_dir) = exe_dir.parent() {
                let worker_path = profile_dir.join(WORKER_NAME);
                if worker_path.exists() {
                    return Ok(worker_path);
                }
            }
        }

        if let Ok(path) = which::which(WORKER_NAME) {
            return Ok(path);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            for profile in &["debug", "release"] {
                let path = PathBuf::from(&manifest_dir)
                    .join("..")
                    .join("..")
                    .join("target")
                    .join(profile)
                    .join(WORKER_NAME);
                if path.exists() {
                    return Ok(path.canonicalize().unwrap_or(path));
                }
            }
        }

        Err(Error::WorkerNotFound(format!(
            "could not find {}. Set {} or ensure it's in PATH.",
            WORKER_NAME, WORKER_PATH_ENV
        )))
    }

    /// Full classpath for a project: project entries, support, framework.
    pub fn classpath(&self, project_classpath: &[PathBuf]) -> Vec<PathBuf> {
        project_classpath
            .iter()
            .chain(&self.support_classpath)
            .chain(&self.framework_classpath)
            .cloned()
            .collect()
    }

    /// Build the worker command line for a project classpath.
    pub fn command_line(&self, project_classpath: &[PathBuf]) -> Result<WorkerCommandLine> {
        let program = self.resolve_executable()?;
        let classpath = std::env::join_paths(self.classpath(project_classpath))
            .map_err(|e| Error::Config(format!("invalid classpath entry: {}", e)))?;

        let mut args: Vec<OsString> = self.flags.iter().map(OsString::from).collect();
        args.push(OsString::from("--classpath"));
        args.push(classpath);

        Ok(WorkerCommandLine { program, args })
    }
}

/// A resolved worker invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommandLine {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommandLine {
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Per-project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directories scanned for module and context definitions.
    pub source_roots: Vec<PathBuf>,
    /// Project classpath handed to the worker.
    pub classpath: Vec<PathBuf>,
    /// Keys to report for every context, as `Key` or `Key@annotation`.
    pub interesting_keys: Vec<String>,
    /// Create a single-module context for every module no context uses.
    pub infer_default_contexts: bool,
    pub worker: WorkerConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            source_roots: vec![PathBuf::from("src")],
            classpath: vec![PathBuf::from("classes")],
            interesting_keys: Vec::new(),
            infer_default_contexts: false,
            worker: WorkerConfig::default(),
        }
    }
}

impl ProjectConfig {
    /// Load `.bindscope/project.json` under `project_root`, falling back to
    /// defaults when the file does not exist.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = ProjectDirs::locate(project_root).config_path;
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Write the config to `.bindscope/project.json`.
    pub fn save(&self, project_root: &Path) -> Result<()> {
        let dirs = ProjectDirs::create(project_root)?;
        fs::write(&dirs.config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
