//! Code problems reported by the resolution pipeline.
//!
//! A [`CodeProblem`] is created where a failure is observed: inside the
//! worker (module instantiation, key lookup) or on the caller side
//! (transport faults). Problems are immutable once built and travel
//! across the process boundary as rkyv values.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

/// One frame of a problem's stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub struct StackFrame {
    /// Human-readable frame, e.g. `com.example.WorkingModule.configure (WorkingModule.java:14)`.
    pub location: String,
}

impl StackFrame {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ProblemKind {
    /// A module could not be instantiated.
    InvalidModule { module: String },
    /// A key could not be resolved outside of its declared scope.
    OutOfScope { key: String },
    /// Binding lookup failed for a key.
    KeyResolution { key: String },
    /// Anything else, including transport faults.
    Generic,
}

/// Output stream a transport fault was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum StreamTag {
    /// Result stream was truncated or held an undecodable frame.
    Stdout,
    /// The worker printed diagnostics before failing.
    Stderr,
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTag::Stdout => write!(f, "stdout"),
            StreamTag::Stderr => write!(f, "stderr"),
        }
    }
}

/// A problem found while resolving bindings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub struct CodeProblem {
    pub message: String,
    pub stack_trace: Vec<StackFrame>,
    pub kind: ProblemKind,
    /// Set for transport faults only.
    pub stream: Option<StreamTag>,
}

impl CodeProblem {
    fn new(kind: ProblemKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: Vec::new(),
            kind,
            stream: None,
        }
    }

    pub fn invalid_module(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ProblemKind::InvalidModule {
                module: module.into(),
            },
            message,
        )
    }

    pub fn out_of_scope(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProblemKind::OutOfScope { key: key.into() }, message)
    }

    pub fn key_resolution(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProblemKind::KeyResolution { key: key.into() }, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ProblemKind::Generic, message)
    }

    /// A transport fault observed on `stream`.
    pub fn transport(stream: StreamTag, message: impl Into<String>) -> Self {
        Self::new(ProblemKind::Generic, message).with_stream(stream)
    }

    pub fn with_stack(mut self, frames: impl IntoIterator<Item = StackFrame>) -> Self {
        self.stack_trace = frames.into_iter().collect();
        self
    }

    pub fn with_stream(mut self, stream: StreamTag) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Name of the module this problem blames, for `InvalidModule` problems.
    pub fn invalid_module_name(&self) -> Option<&str> {
        match &self.kind {
            ProblemKind::InvalidModule { module } => Some(module),
            _ => None,
        }
    }

    pub fn is_invalid_module(&self) -> bool {
        matches!(self.kind, ProblemKind::InvalidModule { .. })
    }
}

impl fmt::Display for CodeProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ProblemKind::InvalidModule { module } => write!(f, "invalid module {}: ", module)?,
            ProblemKind::OutOfScope { key } => write!(f, "{} out of scope: ", key)?,
            ProblemKind::KeyResolution { key } => write!(f, "cannot resolve {}: ", key)?,
            ProblemKind::Generic => {}
        }
        write!(f, "{}", self.message)?;
        if let Some(stream) = self.stream {
            write!(f, " [{}]", stream)?;
        }
        Ok(())
    }
}

/// Append `incoming` to `problems`, skipping duplicates.
pub fn merge_problems(problems: &mut Vec<CodeProblem>, incoming: impl IntoIterator<Item = CodeProblem>) {
    for problem in incoming {
        if !problems.contains(&problem) {
            problems.push(problem);
        }
    }
}
