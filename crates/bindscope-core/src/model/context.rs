//! Module contexts: named combinations of modules and their resolved bindings.
//!
//! A context is either fresh or dirty. Any membership change makes it dirty;
//! only a complete successful resolution pass makes it fresh again, and that
//! pass replaces the bindings wholesale. A failed pass keeps the previous
//! bindings for display and attaches its problems. The representation never
//! resolves anything itself.

use rustc_hash::FxHashMap;

use crate::ipc::ModuleSpec;
use crate::problem::CodeProblem;

use super::location::{BindingCodeLocation, BindingKey};

/// Name given to a context inferred for a single module.
pub fn default_context_name(module: &str) -> String {
    module.to_string()
}

#[derive(Debug, Clone)]
pub struct ModuleContextRepresentation {
    name: String,
    members: Vec<ModuleSpec>,
    bindings: FxHashMap<BindingKey, BindingCodeLocation>,
    problems: Vec<CodeProblem>,
    dirty: bool,
    /// Bumped on every membership change; used to discard results computed
    /// for an older membership.
    generation: u64,
}

impl ModuleContextRepresentation {
    /// A new context starts dirty: it has never been resolved.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            bindings: FxHashMap::default(),
            problems: Vec::new(),
            dirty: true,
            generation: 0,
        }
    }

    pub fn with_modules(name: impl Into<String>, modules: impl IntoIterator<Item = ModuleSpec>) -> Self {
        let mut context = Self::new(name);
        for module in modules {
            context.add_module(module);
        }
        context
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[ModuleSpec] {
        &self.members
    }

    pub fn contains(&self, module: &str) -> bool {
        self.members.iter().any(|m| m.name == module)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn problems(&self) -> &[CodeProblem] {
        &self.problems
    }

    pub fn has_bindings(&self) -> bool {
        !self.bindings.is_empty()
    }

    /// Bindings sorted by key.
    pub fn bindings(&self) -> Vec<&BindingCodeLocation> {
        let mut bindings: Vec<_> = self.bindings.iter().collect();
        bindings.sort_by(|a, b| a.0.cmp(b.0));
        bindings.into_iter().map(|(_, location)| location).collect()
    }

    /// Look up where `key` is bound. Callers resolve dirty contexts first.
    pub fn find_location(&self, key: &str, annotation: Option<&str>) -> Option<&BindingCodeLocation> {
        self.bindings.get(&BindingKey::new(key, annotation))
    }

    /// Add `module`, replacing a member of the same name. Returns false when
    /// an identical member was already present.
    pub fn add_module(&mut self, module: ModuleSpec) -> bool {
        match self.members.iter_mut().find(|m| m.name == module.name) {
            Some(existing) if *existing == module => return false,
            Some(existing) => *existing = module,
            None => self.members.push(module),
        }
        self.touch();
        true
    }

    /// Remove the named member. Absent members are a no-op.
    pub fn remove_module(&mut self, module: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.name != module);
        if self.members.len() == before {
            return false;
        }
        self.touch();
        true
    }

    pub fn clear_modules(&mut self) -> bool {
        if self.members.is_empty() {
            return false;
        }
        self.members.clear();
        self.touch();
        true
    }

    /// Mark stale without changing membership (e.g. a member's source changed).
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.generation += 1;
    }

    /// Install the result of a successful pass.
    pub(crate) fn apply_resolution(&mut self, bindings: Vec<BindingCodeLocation>) {
        self.bindings = bindings
            .into_iter()
            .map(|location| (location.key(), location))
            .collect();
        self.problems.clear();
        self.dirty = false;
    }

    /// Record a failed pass: stays dirty, keeps last-known bindings.
    pub(crate) fn apply_failure(&mut self, problems: Vec<CodeProblem>) {
        self.problems = problems;
        self.dirty = true;
    }

    /// Drop members for which `keep` returns false, without bumping the
    /// generation. Used after a successful pass to forget members that
    /// source discovery no longer finds.
    pub(crate) fn prune_members(&mut self, keep: impl Fn(&str) -> bool) {
        self.members.retain(|m| keep(&m.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blue_binding() -> BindingCodeLocation {
        BindingCodeLocation::Bound {
            requested_key: "Service".to_string(),
            annotation: Some("blue".to_string()),
            bound_to: "BlueService".to_string(),
            source_file: None,
            source_line: None,
            problems: vec![],
        }
    }

    #[test]
    fn test_new_context_is_dirty_and_empty() {
        let context = ModuleContextRepresentation::new("ctx");
        assert!(context.is_dirty());
        assert!(context.is_empty());
        assert!(!context.has_bindings());
    }

    #[test]
    fn test_add_module_marks_dirty() {
        let mut context = ModuleContextRepresentation::new("ctx");
        context.apply_resolution(Vec::new());
        assert!(!context.is_dirty());

        assert!(context.add_module(ModuleSpec::new("WorkingModule")));
        assert!(context.is_dirty());
        assert!(context.contains("WorkingModule"));
    }

    #[test]
    fn test_remove_absent_module_is_noop() {
        let mut context = ModuleContextRepresentation::with_modules("ctx", [ModuleSpec::new("A")]);
        context.apply_resolution(Vec::new());
        let generation = context.generation();

        assert!(!context.remove_module("B"));
        assert!(!context.is_dirty());
        assert_eq!(context.members(), &[ModuleSpec::new("A")]);
        assert_eq!(context.generation(), generation);
    }

    #[test]
    fn test_add_replaces_by_name() {
        let mut context = ModuleContextRepresentation::new("ctx");
        context.add_module(ModuleSpec::with_arguments("A", vec!["1".to_string()]));
        context.add_module(ModuleSpec::with_arguments("A", vec!["2".to_string()]));

        assert_eq!(context.members().len(), 1);
        assert_eq!(context.members()[0].arguments, vec!["2"]);
    }

    #[test]
    fn test_identical_add_is_noop() {
        let mut context = ModuleContextRepresentation::with_modules("ctx", [ModuleSpec::new("A")]);
        context.apply_resolution(Vec::new());

        assert!(!context.add_module(ModuleSpec::new("A")));
        assert!(!context.is_dirty());
    }

    #[test]
    fn test_resolution_replaces_wholesale() {
        let mut context = ModuleContextRepresentation::new("ctx");
        context.apply_resolution(vec![
            blue_binding(),
            BindingCodeLocation::NoBinding {
                requested_key: "Other".to_string(),
                annotation: None,
            },
        ]);
        assert!(context.find_location("Other", None).is_some());

        context.apply_resolution(vec![blue_binding()]);
        assert!(context.find_location("Other", None).is_none());
        assert_eq!(
            context.find_location("Service", Some("blue")).and_then(|l| l.bind_to()),
            Some("BlueService")
        );
    }

    #[test]
    fn test_failure_keeps_previous_bindings() {
        let mut context = ModuleContextRepresentation::new("ctx");
        context.apply_resolution(vec![blue_binding()]);
        context.add_module(ModuleSpec::new("Broken"));

        context.apply_failure(vec![CodeProblem::invalid_module("Broken", "boom")]);

        assert!(context.is_dirty());
        assert_eq!(context.problems().len(), 1);
        assert!(context.find_location("Service", Some("blue")).is_some());
    }

    #[test]
    fn test_success_clears_problems() {
        let mut context = ModuleContextRepresentation::new("ctx");
        context.apply_failure(vec![CodeProblem::generic("crash")]);
        context.apply_resolution(Vec::new());
        assert!(context.problems().is_empty());
        assert!(!context.is_dirty());
    }
}
