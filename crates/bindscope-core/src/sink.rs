//! Outbound collaborators: problems, diagnostic messages and batch results.
//!
//! All sinks may be called from the run queue's execution thread while the
//! caller thread reads manager state, so implementations must not block.
//! The channel-backed sinks hand values to the owning thread through a
//! bounded `sync_channel` and drop (with a warning) when it is full.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

use crate::manager::UpdateReport;
use crate::problem::CodeProblem;

/// Receives problems found while resolving.
pub trait ProblemsSink: Send + Sync {
    fn push(&self, problems: &[CodeProblem]);
}

/// Receives free-text diagnostic lines (worker stderr, lifecycle notes).
pub trait Messenger: Send + Sync {
    fn message(&self, text: &str);
}

/// Receives the aggregated results of each finished `update()`.
pub trait ResultsSink: Send + Sync {
    fn publish(&self, report: &UpdateReport);
}

/// The set of sinks a module manager reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub problems: Arc<dyn ProblemsSink>,
    pub messenger: Arc<dyn Messenger>,
    pub results: Arc<dyn ResultsSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            problems: Arc::new(TracingSink),
            messenger: Arc::new(TracingSink),
            results: Arc::new(TracingSink),
        }
    }
}

impl Collaborators {
    /// Collaborators that discard everything.
    pub fn silent() -> Self {
        Self {
            problems: Arc::new(NullSink),
            messenger: Arc::new(NullSink),
            results: Arc::new(NullSink),
        }
    }

    pub fn with_problems(mut self, problems: Arc<dyn ProblemsSink>) -> Self {
        self.problems = problems;
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger = messenger;
        self
    }

    pub fn with_results(mut self, results: Arc<dyn ResultsSink>) -> Self {
        self.results = results;
        self
    }
}

/// Logs everything through `tracing`.
pub struct TracingSink;

impl ProblemsSink for TracingSink {
    fn push(&self, problems: &[CodeProblem]) {
        for problem in problems {
            tracing::warn!("{}", problem);
        }
    }
}

impl Messenger for TracingSink {
    fn message(&self, text: &str) {
        tracing::info!(target: "bindscope::worker", "{}", text);
    }
}

impl ResultsSink for TracingSink {
    fn publish(&self, report: &UpdateReport) {
        tracing::info!("{}", report.summary());
    }
}

/// Discards everything.
pub struct NullSink;

impl ProblemsSink for NullSink {
    fn push(&self, _problems: &[CodeProblem]) {}
}

impl Messenger for NullSink {
    fn message(&self, _text: &str) {}
}

impl ResultsSink for NullSink {
    fn publish(&self, _report: &UpdateReport) {}
}

fn offer<T>(tx: &SyncSender<T>, value: T, what: &str) {
    match tx.try_send(value) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!("{} channel full, dropping update", what);
        }
        Err(TrySendError::Disconnected(_)) => {
            tracing::debug!("{} channel closed", what);
        }
    }
}

/// Problems sink forwarding batches into a bounded channel.
pub struct ChannelProblemsSink {
    tx: SyncSender<Vec<CodeProblem>>,
}

impl ChannelProblemsSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Vec<CodeProblem>>) {
        let (tx, rx) = sync_channel(capacity);
        (Self { tx }, rx)
    }
}

impl ProblemsSink for ChannelProblemsSink {
    fn push(&self, problems: &[CodeProblem]) {
        if problems.is_empty() {
            return;
        }
        offer(&self.tx, problems.to_vec(), "problems");
    }
}

/// Messenger forwarding lines into a bounded channel.
pub struct ChannelMessenger {
    tx: SyncSender<String>,
}

impl ChannelMessenger {
    pub fn bounded(capacity: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = sync_channel(capacity);
        (Self { tx }, rx)
    }
}

impl Messenger for ChannelMessenger {
    fn message(&self, text: &str) {
        offer(&self.tx, text.to_string(), "messages");
    }
}

/// Results sink forwarding reports into a bounded channel.
pub struct ChannelResultsSink {
    tx: SyncSender<UpdateReport>,
}

impl ChannelResultsSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<UpdateReport>) {
        let (tx, rx) = sync_channel(capacity);
        (Self { tx }, rx)
    }
}

impl ResultsSink for ChannelResultsSink {
    fn publish(&self, report: &UpdateReport) {
        offer(&self.tx, report.clone(), "results");
    }
}
