//! A minimal injector built from module descriptors.
//!
//! Creating an injector instantiates every requested module (checking its
//! constructor arguments and installing its children) and collects the
//! declared bindings. Lookups follow linked bindings to the final
//! implementation.

use std::collections::BTreeMap;

use bindscope_core::ipc::ModuleSpec;
use bindscope_core::model::{BindingCodeLocation, BindingKey};
use bindscope_core::problem::{CodeProblem, StackFrame};

use crate::classpath::{Classpath, display_path};
use crate::descriptor::{BindingDecl, ModuleDescriptor};

#[derive(Debug, Clone)]
struct Declared {
    decl: BindingDecl,
    module: String,
    source: Option<String>,
}

#[derive(Debug, Default)]
pub struct Injector {
    bindings: BTreeMap<BindingKey, Vec<Declared>>,
}

impl Injector {
    /// Instantiate `modules` and collect their bindings. Every module that
    /// fails yields one `InvalidModule` problem naming it.
    pub fn create(classpath: &Classpath, modules: &[ModuleSpec]) -> Result<Self, Vec<CodeProblem>> {
        let mut injector = Self::default();
        let mut installed = Vec::new();
        let mut problems = Vec::new();

        for module in modules {
            let mut chain = Vec::new();
            if let Err(failure) = injector.install(classpath, module, &mut chain, &mut installed) {
                problems.push(failure.into_problem(&module.name));
            }
        }

        if problems.is_empty() {
            Ok(injector)
        } else {
            Err(problems)
        }
    }

    fn install(
        &mut self,
        classpath: &Classpath,
        module: &ModuleSpec,
        chain: &mut Vec<String>,
        installed: &mut Vec<String>,
    ) -> Result<(), Failure> {
        if chain.contains(&module.name) {
            return Err(Failure::new(
                format!("{} installs itself: {} -> {}", module.name, chain.join(" -> "), module.name),
                chain,
            ));
        }
        // Installing the same module twice is harmless.
        if installed.contains(&module.name) {
            return Ok(());
        }
        chain.push(module.name.clone());

        let path = classpath.find_module(&module.name).ok_or_else(|| {
            Failure::new(format!("module {} not found on the classpath", module.name), chain)
        })?;
        let descriptor = ModuleDescriptor::load(&path).map_err(|e| {
            Failure::new(format!("cannot load {}: {}", display_path(classpath, &path), e), chain)
        })?;

        if let Some(declared) = &descriptor.name
            && declared != &module.name
        {
            return Err(Failure::new(
                format!("{} declares module {}", display_path(classpath, &path), declared),
                chain,
            ));
        }
        if descriptor.parameters.len() != module.arguments.len() {
            return Err(Failure::new(
                format!(
                    "{} expects {} constructor argument(s) ({}), got {}",
                    module.name,
                    descriptor.parameters.len(),
                    descriptor.parameters.join(", "),
                    module.arguments.len()
                ),
                chain,
            ));
        }
        if let Some(message) = &descriptor.constructor_error {
            return Err(Failure::new(
                format!("constructor of {} threw: {}", module.name, message),
                chain,
            ));
        }

        for child in &descriptor.installs {
            self.install(classpath, &ModuleSpec::new(child.clone()), chain, installed)?;
        }

        let source = descriptor
            .source
            .clone()
            .or_else(|| Some(display_path(classpath, &path)));
        for decl in descriptor.bindings {
            let key = BindingKey::new(decl.key.clone(), decl.annotation.as_deref());
            self.bindings.entry(key).or_default().push(Declared {
                decl,
                module: module.name.clone(),
                source: source.clone(),
            });
        }

        chain.pop();
        installed.push(module.name.clone());
        Ok(())
    }

    /// Every declared key, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &BindingKey> {
        self.bindings.keys()
    }

    /// Where `key` is bound, following linked bindings.
    pub fn locate(&self, key: &BindingKey) -> BindingCodeLocation {
        let Some(declared) = self.bindings.get(key) else {
            return BindingCodeLocation::NoBinding {
                requested_key: key.key.clone(),
                annotation: key.annotation.clone(),
            };
        };
        let first = &declared[0];
        let mut problems = Vec::new();

        if let Some(other) = declared.iter().find(|d| d.decl.target() != first.decl.target()) {
            problems.push(CodeProblem::key_resolution(
                key.to_string(),
                format!(
                    "{} is bound more than once: to {} in {} and to {} in {}",
                    key,
                    first.decl.target(),
                    first.module,
                    other.decl.target(),
                    other.module
                ),
            ));
        }

        let mut current_key = key.clone();
        let mut current = first;
        let mut visited = vec![key.clone()];
        loop {
            if current.decl.is_request_scoped() {
                problems.push(CodeProblem::out_of_scope(
                    key.to_string(),
                    format!(
                        "{} is {}-scoped and cannot be resolved outside of a {}",
                        current_key,
                        current.decl.scope.as_deref().unwrap_or_default(),
                        current.decl.scope.as_deref().unwrap_or_default()
                    ),
                ));
            }

            let next_key = BindingKey::plain(current.decl.target());
            if next_key == current_key {
                break;
            }
            if visited.contains(&next_key) {
                let path: Vec<String> = visited.iter().map(ToString::to_string).collect();
                problems.push(CodeProblem::key_resolution(
                    key.to_string(),
                    format!("linked bindings form a cycle: {} -> {}", path.join(" -> "), next_key),
                ));
                break;
            }
            match self.bindings.get(&next_key) {
                Some(next) => {
                    visited.push(next_key.clone());
                    current_key = next_key;
                    current = &next[0];
                }
                None => break,
            }
        }

        BindingCodeLocation::Bound {
            requested_key: key.key.clone(),
            annotation: key.annotation.clone(),
            bound_to: current.decl.target().to_string(),
            source_file: first.source.clone(),
            source_line: first.decl.line,
            problems,
        }
    }
}

/// A module that could not be installed, with the install chain leading to it.
struct Failure {
    message: String,
    frames: Vec<StackFrame>,
}

impl Failure {
    fn new(message: String, chain: &[String]) -> Self {
        let frames = chain
            .iter()
            .rev()
            .map(|module| StackFrame::new(format!("{}.<init>", module)))
            .collect();
        Self { message, frames }
    }

    fn into_problem(self, module: &str) -> CodeProblem {
        CodeProblem::invalid_module(module, self.message).with_stack(self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_module(dir: &TempDir, name: &str, json: &str) {
        let path = dir.path().join(bindscope_core::source::module_descriptor_path(name));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, json).unwrap();
    }

    fn classpath(dir: &TempDir) -> Classpath {
        Classpath::new(vec![dir.path().to_path_buf()])
    }

    #[test]
    fn test_annotated_binding() {
        let dir = TempDir::new().unwrap();
        write_module(
            &dir,
            "WorkingModule",
            r#"{"source": "WorkingModule.java", "bindings": [
                {"key": "Service", "annotation": "blue", "to": "BlueService", "line": 7}
            ]}"#,
        );

        let injector = Injector::create(&classpath(&dir), &[ModuleSpec::new("WorkingModule")]).unwrap();
        let location = injector.locate(&BindingKey::new("Service", Some("blue")));

        assert_eq!(location.bind_to(), Some("BlueService"));
        assert_eq!(location.source(), Some(("WorkingModule.java", Some(7))));
        assert!(location.problems().is_empty());
        assert!(!injector.locate(&BindingKey::plain("Service")).is_bound());
    }

    #[test]
    fn test_linked_bindings_followed() {
        let dir = TempDir::new().unwrap();
        write_module(
            &dir,
            "Linked",
            r#"{"bindings": [
                {"key": "Service", "to": "BaseService"},
                {"key": "BaseService", "to": "FastService"}
            ]}"#,
        );
        let injector = Injector::create(&classpath(&dir), &[ModuleSpec::new("Linked")]).unwrap();
        assert_eq!(
            injector.locate(&BindingKey::plain("Service")).bind_to(),
            Some("FastService")
        );
    }

    #[test]
    fn test_cycle_is_key_resolution_problem() {
        let dir = TempDir::new().unwrap();
        write_module(
            &dir,
            "Cyclic",
            r#"{"bindings": [{"key": "A", "to": "B"}, {"key": "B", "to": "A"}]}"#,
        );
        let injector = Injector::create(&classpath(&dir), &[ModuleSpec::new("Cyclic")]).unwrap();
        let location = injector.locate(&BindingKey::plain("A"));
        assert_eq!(location.problems().len(), 1);
        assert!(location.problems()[0].message.contains("cycle"));
    }

    #[test]
    fn test_conflicting_duplicates() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "One", r#"{"bindings": [{"key": "Store", "to": "SqlStore"}]}"#);
        write_module(&dir, "Two", r#"{"bindings": [{"key": "Store", "to": "MemoryStore"}]}"#);
        let injector = Injector::create(
            &classpath(&dir),
            &[ModuleSpec::new("One"), ModuleSpec::new("Two")],
        )
        .unwrap();
        let location = injector.locate(&BindingKey::plain("Store"));
        assert_eq!(location.bind_to(), Some("SqlStore"));
        assert!(location.problems()[0].message.contains("more than once"));
    }

    #[test]
    fn test_request_scope_is_out_of_scope() {
        let dir = TempDir::new().unwrap();
        write_module(
            &dir,
            "Web",
            r#"{"bindings": [{"key": "Cart", "to": "SessionCart", "scope": "session"}]}"#,
        );
        let injector = Injector::create(&classpath(&dir), &[ModuleSpec::new("Web")]).unwrap();
        let location = injector.locate(&BindingKey::plain("Cart"));
        assert_eq!(
            location.problems()[0].kind,
            bindscope_core::problem::ProblemKind::OutOfScope {
                key: "Cart".to_string()
            }
        );
    }

    #[test]
    fn test_constructor_error_is_invalid_module() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "Throwing", r#"{"constructor_error": "boom"}"#);
        write_module(&dir, "Fine", "{}");

        let problems = Injector::create(
            &classpath(&dir),
            &[ModuleSpec::new("Throwing"), ModuleSpec::new("Fine")],
        )
        .unwrap_err();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].invalid_module_name(), Some("Throwing"));
        assert!(problems[0].message.contains("boom"));
    }

    #[test]
    fn test_argument_count_checked() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "Db", r#"{"parameters": ["url"]}"#);
        let cp = classpath(&dir);

        assert!(Injector::create(&cp, &[ModuleSpec::new("Db")]).is_err());
        assert!(
            Injector::create(&cp, &[ModuleSpec::with_arguments("Db", vec!["jdbc:x".to_string()])]).is_ok()
        );
    }

    #[test]
    fn test_broken_install_names_installing_module() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "App", r#"{"installs": ["Missing"]}"#);
        let problems = Injector::create(&classpath(&dir), &[ModuleSpec::new("App")]).unwrap_err();
        assert_eq!(problems[0].invalid_module_name(), Some("App"));
        assert_eq!(problems[0].stack_trace.len(), 2);
    }

    #[test]
    fn test_declared_name_must_match() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "com.acme.Shop", r#"{"name": "com.acme.Store"}"#);
        let problems = Injector::create(&classpath(&dir), &[ModuleSpec::new("com.acme.Shop")]).unwrap_err();
        assert!(problems[0].message.contains("declares module com.acme.Store"));
    }

    #[test]
    fn test_install_cycle() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "A", r#"{"installs": ["B"]}"#);
        write_module(&dir, "B", r#"{"installs": ["A"]}"#);
        let problems = Injector::create(&classpath(&dir), &[ModuleSpec::new("A")]).unwrap_err();
        assert!(problems[0].message.contains("installs itself"));
    }
}
