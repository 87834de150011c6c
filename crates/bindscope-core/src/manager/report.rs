//! Aggregated outcome of one `update()` call.

use std::fmt;

use crate::model::Validity;
use crate::problem::CodeProblem;

/// What happened to one context during an update.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextStatus {
    /// Resolved; the context is fresh.
    Resolved,
    /// Resolution failed; the context stays dirty with these problems.
    Failed(Vec<CodeProblem>),
    /// The batch was cancelled before this context was resolved.
    Cancelled,
    /// The context changed while the batch ran; its result was discarded.
    Stale,
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextStatus::Resolved => write!(f, "resolved"),
            ContextStatus::Failed(problems) => write!(f, "failed ({} problem(s))", problems.len()),
            ContextStatus::Cancelled => write!(f, "cancelled"),
            ContextStatus::Stale => write!(f, "stale"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextOutcome {
    pub name: String,
    pub status: ContextStatus,
    /// Number of bindings the context holds afterwards.
    pub bindings: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutcome {
    pub name: String,
    pub validity: Validity,
    pub problems: Vec<CodeProblem>,
}

/// Results of one `update()`, published to the results sink.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateReport {
    pub project: String,
    pub contexts: Vec<ContextOutcome>,
    pub modules: Vec<ModuleOutcome>,
    /// Whether a worker process was started.
    pub launched: bool,
    pub cancelled: bool,
}

impl UpdateReport {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    pub fn context(&self, name: &str) -> Option<&ContextOutcome> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleOutcome> {
        self.modules.iter().find(|m| m.name == name)
    }

    fn count(&self, matches: impl Fn(&ContextStatus) -> bool) -> usize {
        self.contexts.iter().filter(|c| matches(&c.status)).count()
    }

    pub fn resolved(&self) -> usize {
        self.count(|s| *s == ContextStatus::Resolved)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ContextStatus::Failed(_)))
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}: {} context(s) resolved, {} failed",
            self.project,
            self.resolved(),
            self.failed()
        );
        let cancelled = self.count(|s| *s == ContextStatus::Cancelled);
        if cancelled > 0 {
            summary.push_str(&format!(", {} cancelled", cancelled));
        }
        let stale = self.count(|s| *s == ContextStatus::Stale);
        if stale > 0 {
            summary.push_str(&format!(", {} stale", stale));
        }
        let broken = self.modules.iter().filter(|m| m.validity == Validity::Broken).count();
        if broken > 0 {
            summary.push_str(&format!(", {} broken module(s)", broken));
        }
        if !self.launched {
            summary.push_str(" (no worker launched)");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let mut report = UpdateReport::new("shop");
        report.launched = true;
        report.contexts.push(ContextOutcome {
            name: "a".to_string(),
            status: ContextStatus::Resolved,
            bindings: 2,
        });
        report.contexts.push(ContextOutcome {
            name: "b".to_string(),
            status: ContextStatus::Failed(vec![CodeProblem::generic("boom")]),
            bindings: 0,
        });
        report.contexts.push(ContextOutcome {
            name: "c".to_string(),
            status: ContextStatus::Cancelled,
            bindings: 0,
        });

        assert_eq!(report.summary(), "shop: 1 context(s) resolved, 1 failed, 1 cancelled");
        assert_eq!(report.context("b").unwrap().status.to_string(), "failed (1 problem(s))");
    }

    #[test]
    fn test_summary_without_launch() {
        let report = UpdateReport::new("empty");
        assert_eq!(report.summary(), "empty: 0 context(s) resolved, 0 failed (no worker launched)");
    }
}
