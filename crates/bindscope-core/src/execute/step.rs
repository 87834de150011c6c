//! Progress step that waits for one runner result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;

use crate::problem::CodeProblem;

use super::progress::{ProgressStep, StepStatus};
use super::request::RunResult;
use super::runner::ProcessRunner;

/// Waits for the result of request `index` and forwards it, tagged, to the
/// thread that owns the batch.
///
/// Every step sends exactly one message: its result when it ran, or
/// `Cancelled` when it was skipped. The owner can therefore count messages.
pub struct SnippetStep<T> {
    label: String,
    runner: Arc<ProcessRunner>,
    index: usize,
    tag: T,
    tx: SyncSender<(T, RunResult)>,
    sent: AtomicBool,
}

impl<T: Clone + Send + Sync> SnippetStep<T> {
    pub fn new(
        label: impl Into<String>,
        runner: Arc<ProcessRunner>,
        index: usize,
        tag: T,
        tx: SyncSender<(T, RunResult)>,
    ) -> Self {
        Self {
            label: label.into(),
            runner,
            index,
            tag,
            tx,
            sent: AtomicBool::new(false),
        }
    }

    fn send(&self, result: RunResult) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.tx.send((self.tag.clone(), result)).is_err() {
            tracing::debug!("result receiver for {:?} is gone", self.label);
        }
    }
}

impl<T: Clone + Send + Sync> ProgressStep for SnippetStep<T> {
    fn label(&self) -> &str {
        &self.label
    }

    fn run(&self) -> StepStatus {
        let result = self.runner.wait_for_result(self.index).unwrap_or_else(|e| {
            RunResult::failure(CodeProblem::generic(format!("{}: {}", self.label, e)))
        });
        let status = if result.is_cancelled() && self.runner.is_cancelled() {
            StepStatus::Cancelled
        } else {
            StepStatus::Completed
        };
        self.send(result);
        status
    }

    fn cancel(&self) {
        self.runner.cancel();
    }

    fn complete(&self) {
        self.send(RunResult::Cancelled);
    }

    fn is_done(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}
