//! Worker command line and classpath lookup.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use bindscope_core::source::module_descriptor_path;

/// Directories searched, in order, for module descriptors.
#[derive(Debug, Clone)]
pub struct Classpath {
    entries: Vec<PathBuf>,
}

impl Classpath {
    /// Parse `<flags>... --classpath <entries>`. Other flags are accepted and
    /// ignored. Every entry must be an existing directory.
    pub fn from_args(args: &[OsString]) -> anyhow::Result<Self> {
        let mut joined = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--classpath" {
                joined = Some(iter.next().context("--classpath needs a value")?);
            } else {
                tracing::debug!("Ignoring worker flag {:?}", arg);
            }
        }
        let joined = joined.context("missing --classpath")?;

        let entries: Vec<PathBuf> = std::env::split_paths(joined)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        for entry in &entries {
            if !entry.is_dir() {
                bail!("classpath entry {} is not a directory", entry.display());
            }
        }
        Ok(Self { entries })
    }

    #[cfg(test)]
    pub fn new(entries: Vec<PathBuf>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// First descriptor for `module` along the classpath.
    pub fn find_module(&self, module: &str) -> Option<PathBuf> {
        let relative = module_descriptor_path(module);
        self.entries
            .iter()
            .map(|entry| entry.join(&relative))
            .find(|path| path.is_file())
    }
}

/// Display form of a descriptor path, relative to its classpath entry when
/// possible.
pub fn display_path(classpath: &Classpath, path: &Path) -> String {
    classpath
        .entries()
        .iter()
        .find_map(|entry| path.strip_prefix(entry).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}
