//! Source discovery.
//!
//! A [`Source`] supplies the modules or context definitions of a project.
//! [`FileSource`] walks directories and hands every matching file to a
//! [`SourceStrategy`], which decides what the file means. Two strategies
//! exist: [`ModuleStrategy`] for `*.module.json` descriptors and
//! [`ContextStrategy`] for `*.context.json` definitions.
//!
//! Module names follow the descriptor path relative to its root:
//! `com/acme/ShopModule.module.json` is module `com.acme.ShopModule`.

use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

use rustc_hash::FxHasher;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::ipc::ModuleSpec;
use crate::project::ProjectHandle;

/// File suffix of module descriptors.
pub const MODULE_SUFFIX: &str = ".module.json";

/// File suffix of context definitions.
pub const CONTEXT_SUFFIX: &str = ".context.json";

/// Relative path of the descriptor for module `name`.
pub fn module_descriptor_path(name: &str) -> PathBuf {
    let mut path: PathBuf = name.split('.').collect();
    let file = format!(
        "{}{}",
        path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default(),
        MODULE_SUFFIX
    );
    path.set_file_name(file);
    path
}

/// Supplies discovered entities of type `T` for a project.
pub trait Source<T>: Send + Sync {
    fn discover(&self, project: &ProjectHandle) -> Result<Vec<T>>;
}

/// What a [`FileSource`] looks for and how it reads a match.
pub trait SourceStrategy: Send + Sync {
    type Item;

    /// Directories to walk.
    fn roots(&self, project: &ProjectHandle) -> Vec<PathBuf>;

    fn matches(&self, path: &Path) -> bool;

    /// Read one matching file found under `root`.
    fn load(&self, root: &Path, path: &Path) -> Result<Self::Item>;
}

/// Walks the strategy's roots in file-name order.
pub struct FileSource<S> {
    strategy: S,
}

impl<S: SourceStrategy> FileSource<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }
}

impl<S: SourceStrategy> Source<S::Item> for FileSource<S> {
    fn discover(&self, project: &ProjectHandle) -> Result<Vec<S::Item>> {
        let mut items = Vec::new();
        for root in self.strategy.roots(project) {
            if !root.is_dir() {
                tracing::debug!("Skipping missing source root {}", root.display());
                continue;
            }
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
                let path = entry.path();
                if entry.file_type().is_file() && self.strategy.matches(path) {
                    items.push(self.strategy.load(&root, path)?);
                }
            }
        }
        Ok(items)
    }
}

/// A module descriptor found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModule {
    pub name: String,
    pub path: PathBuf,
    /// Hash of the descriptor contents; changes whenever the source does.
    pub fingerprint: u64,
}

/// Finds `*.module.json` under the project's source roots.
pub struct ModuleStrategy;

impl SourceStrategy for ModuleStrategy {
    type Item = DiscoveredModule;

    fn roots(&self, project: &ProjectHandle) -> Vec<PathBuf> {
        project.source_roots()
    }

    fn matches(&self, path: &Path) -> bool {
        has_suffix(path, MODULE_SUFFIX)
    }

    fn load(&self, root: &Path, path: &Path) -> Result<DiscoveredModule> {
        let bytes = fs::read(path)?;
        let mut hasher = FxHasher::default();
        hasher.write(&bytes);

        Ok(DiscoveredModule {
            name: module_name(root, path)?,
            path: path.to_path_buf(),
            fingerprint: hasher.finish(),
        })
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.len() > suffix.len() && name.ends_with(suffix))
}

fn module_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::Config(format!("{} is outside {}", path.display(), root.display())))?;
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(last) = parts.last_mut()
        && let Some(stem) = last.strip_suffix(MODULE_SUFFIX)
    {
        *last = stem.to_string();
    }
    Ok(parts.join("."))
}

/// A context definition found in source or under `.bindscope/contexts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDefinition {
    pub name: String,
    pub modules: Vec<ModuleSpec>,
    pub path: PathBuf,
}

#[derive(Deserialize)]
struct ContextFile {
    name: Option<String>,
    #[serde(default)]
    modules: Vec<MemberRef>,
}

/// A member written either as a bare name or with constructor arguments.
#[derive(Deserialize)]
#[serde(untagged)]
enum MemberRef {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
}

impl From<MemberRef> for ModuleSpec {
    fn from(member: MemberRef) -> Self {
        match member {
            MemberRef::Name(name) => ModuleSpec::new(name),
            MemberRef::Full { name, arguments } => ModuleSpec::with_arguments(name, arguments),
        }
    }
}

/// Finds `*.context.json` under the source roots and `.bindscope/contexts`.
pub struct ContextStrategy;

impl SourceStrategy for ContextStrategy {
    type Item = ContextDefinition;

    fn roots(&self, project: &ProjectHandle) -> Vec<PathBuf> {
        let mut roots = project.source_roots();
        roots.push(project.dirs().contexts_dir);
        roots
    }

    fn matches(&self, path: &Path) -> bool {
        has_suffix(path, CONTEXT_SUFFIX)
    }

    fn load(&self, _root: &Path, path: &Path) -> Result<ContextDefinition> {
        let text = fs::read_to_string(path)?;
        let file: ContextFile = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let name = match file.name {
            Some(name) => name,
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(CONTEXT_SUFFIX))
                .unwrap_or_default()
                .to_string(),
        };

        Ok(ContextDefinition {
            name,
            modules: file.modules.into_iter().map(ModuleSpec::from).collect(),
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use tempfile::TempDir;

    fn project(temp: &TempDir) -> ProjectHandle {
        ProjectHandle::with_config(temp.path(), ProjectConfig::default())
    }

    fn write(temp: &TempDir, relative: &str, contents: &str) {
        let path = temp.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_descriptor_path() {
        assert_eq!(
            module_descriptor_path("com.acme.ShopModule"),
            PathBuf::from("com/acme/ShopModule.module.json")
        );
        assert_eq!(module_descriptor_path("Plain"), PathBuf::from("Plain.module.json"));
    }

    #[test]
    fn test_modules_named_by_path() {
        let temp = TempDir::new().unwrap();
        write(&temp, "src/com/acme/ShopModule.module.json", "{}");
        write(&temp, "src/WorkingModule.module.json", "{}");
        write(&temp, "src/notes.json", "{}");

        let modules = FileSource::new(ModuleStrategy).discover(&project(&temp)).unwrap();
        let names: Vec<&str> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["WorkingModule", "com.acme.ShopModule"]);
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let temp = TempDir::new().unwrap();
        write(&temp, "src/A.module.json", r#"{"bindings": []}"#);
        let source = FileSource::new(ModuleStrategy);
        let before = source.discover(&project(&temp)).unwrap()[0].fingerprint;

        assert_eq!(source.discover(&project(&temp)).unwrap()[0].fingerprint, before);
        write(&temp, "src/A.module.json", r#"{"bindings": [{"key": "X", "to": "Y"}]}"#);
        assert_ne!(source.discover(&project(&temp)).unwrap()[0].fingerprint, before);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(FileSource::new(ModuleStrategy).discover(&project(&temp)).unwrap().is_empty());
    }

    #[test]
    fn test_context_definitions() {
        let temp = TempDir::new().unwrap();
        write(
            &temp,
            "src/app.context.json",
            r#"{"name": "Working Module Context", "modules": ["WorkingModule", {"name": "Db", "arguments": ["jdbc:x"]}]}"#,
        );
        write(&temp, ".bindscope/contexts/extra.context.json", r#"{"modules": []}"#);

        let definitions = FileSource::new(ContextStrategy).discover(&project(&temp)).unwrap();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].name, "Working Module Context");
        assert_eq!(
            definitions[0].modules,
            vec![
                ModuleSpec::new("WorkingModule"),
                ModuleSpec::with_arguments("Db", vec!["jdbc:x".to_string()])
            ]
        );
        assert_eq!(definitions[1].name, "extra");
    }

    #[test]
    fn test_malformed_context_definition() {
        let temp = TempDir::new().unwrap();
        write(&temp, "src/bad.context.json", "[1, 2");
        let err = FileSource::new(ContextStrategy).discover(&project(&temp)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
