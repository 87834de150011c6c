//! Run requests and their results.

use crate::ipc::protocol::{MODULE_CONTEXT_SNIPPET, MODULE_SNIPPET};
use crate::ipc::{ContextQuery, ModuleQuery, SnippetOutcome, SnippetPayload, WorkerCommand};
use crate::problem::CodeProblem;

/// One snippet invocation. Immutable once queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    label: String,
    snippet: String,
    arguments: Vec<String>,
}

impl RunRequest {
    pub fn new(label: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            snippet: snippet.into(),
            arguments: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl ToString) -> Self {
        self.arguments.push(value.to_string());
        self
    }

    pub fn args<I>(mut self, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.arguments.extend(values.into_iter().map(|v| v.to_string()));
        self
    }

    /// Request resolving the bindings of one module context.
    pub fn module_context(query: &ContextQuery) -> Self {
        Self::new(format!("Resolving {}", query.name), MODULE_CONTEXT_SNIPPET)
            .args(query.to_arguments())
    }

    /// Request validating one module.
    pub fn module(query: &ModuleQuery) -> Self {
        Self::new(format!("Validating {}", query.module.name), MODULE_SNIPPET)
            .args(query.to_arguments())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub(crate) fn to_command(&self) -> WorkerCommand {
        WorkerCommand::Run {
            snippet: self.snippet.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// Result of one [`RunRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Success(SnippetPayload),
    Failure(Vec<CodeProblem>),
    /// Not produced because the batch was cancelled or the worker died first.
    Cancelled,
}

impl RunResult {
    pub fn failure(problem: CodeProblem) -> Self {
        Self::Failure(vec![problem])
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn payload(&self) -> Option<&SnippetPayload> {
        match self {
            Self::Success(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn problems(&self) -> &[CodeProblem] {
        match self {
            Self::Failure(problems) => problems,
            _ => &[],
        }
    }
}

impl From<SnippetOutcome> for RunResult {
    fn from(outcome: SnippetOutcome) -> Self {
        match outcome {
            SnippetOutcome::Success(payload) => Self::Success(payload),
            SnippetOutcome::Failure(problems) => Self::Failure(problems),
        }
    }
}
