//! Known binding modules of a project.

use std::fmt;

use crate::ipc::ModuleSpec;
use crate::problem::CodeProblem;

/// Whether a module is known to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validity {
    #[default]
    Unknown,
    Valid,
    Broken,
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validity::Unknown => write!(f, "unknown"),
            Validity::Valid => write!(f, "valid"),
            Validity::Broken => write!(f, "broken"),
        }
    }
}

/// A binding module as tracked by the module manager. Identity is the name.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRepresentation {
    name: String,
    arguments: Vec<String>,
    validity: Validity,
    /// Hash of the module's source; changes invalidate cached resolutions.
    fingerprint: Option<u64>,
    /// False once source discovery stops finding the module.
    locatable: bool,
    problems: Vec<CodeProblem>,
}

impl ModuleRepresentation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            validity: Validity::Unknown,
            fingerprint: None,
            locatable: true,
            problems: Vec::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: u64) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn fingerprint(&self) -> Option<u64> {
        self.fingerprint
    }

    pub fn is_locatable(&self) -> bool {
        self.locatable
    }

    pub fn problems(&self) -> &[CodeProblem] {
        &self.problems
    }

    pub fn spec(&self) -> ModuleSpec {
        ModuleSpec::with_arguments(self.name.clone(), self.arguments.clone())
    }

    pub(crate) fn set_validity(&mut self, validity: Validity, problems: Vec<CodeProblem>) {
        self.validity = validity;
        self.problems = problems;
    }

    /// Record a new source fingerprint. Returns true if the source changed,
    /// in which case validity is reset.
    pub(crate) fn refresh_fingerprint(&mut self, fingerprint: u64) -> bool {
        let changed = self.fingerprint != Some(fingerprint);
        if changed {
            self.fingerprint = Some(fingerprint);
            self.set_validity(Validity::Unknown, Vec::new());
        }
        changed
    }

    pub(crate) fn set_locatable(&mut self, locatable: bool) {
        self.locatable = locatable;
    }
}
