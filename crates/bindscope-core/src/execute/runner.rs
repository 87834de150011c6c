//! Process runner: one worker process per batch.
//!
//! A [`ProcessRunner`] collects requests with [`queue`](ProcessRunner::queue),
//! then [`run`](ProcessRunner::run) spawns the worker, writes every request to
//! its stdin and drains stdout, stderr and the exit status on background
//! threads. Results are matched to requests by position: the worker answers
//! strictly in the order requests were written.
//!
//! ```text
//! ProcessRunner::run
//!     │
//!     ├── stdin writer thread ── Run frames..., Shutdown
//!     ├── stderr thread ──────── lines → Messenger, kept for crash reports
//!     └── stdout thread ──────── handshake, one Result frame per request,
//!                                then child exit → final BatchStatus
//! ```
//!
//! The runner is single use. Running it twice is an error; so is queueing
//! after it started.

use std::io::{BufRead, BufReader, BufWriter, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::ipc::{Frame, WorkerCommand, WorkerResponse, decode_message, read_frame, write_message};
use crate::problem::{CodeProblem, StreamTag};
use crate::sink::{Collaborators, Messenger, ProblemsSink};

use super::request::{RunRequest, RunResult};

/// Receives runner events. Called from the runner's I/O thread while the
/// runner's state lock is held, so implementations must not block and must
/// not call back into the runner.
pub trait RunnerListener: Send + Sync {
    /// One request finished. Called once per request, in request order.
    fn on_result(&self, index: usize, request: &RunRequest, result: &RunResult);

    /// The batch finished (also after a crash).
    fn on_complete(&self);

    /// The batch was cancelled by the user.
    fn on_cancelled(&self);

    /// The worker could not be launched. Followed by `on_complete`.
    fn on_launch_failed(&self, _result: &RunResult) {}
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Requests are still being queued.
    Pending,
    /// The worker is running.
    Running,
    /// Every request produced a result.
    Completed,
    /// The user cancelled; unfinished requests are `Cancelled`.
    Cancelled,
    /// The worker never became ready.
    LaunchFailed,
    /// The worker died mid-batch. The request it was running fails with the
    /// crash diagnostic; the rest are `Cancelled`.
    Crashed,
}

impl BatchStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, BatchStatus::Pending | BatchStatus::Running)
    }
}

struct BatchState {
    status: BatchStatus,
    requests: Arc<Vec<RunRequest>>,
    results: Vec<Option<RunResult>>,
    launch_failure: Option<RunResult>,
    crash: Option<CodeProblem>,
    cancel_requested: bool,
    stderr: String,
    exit_code: Option<i32>,
    listeners: Vec<Arc<dyn RunnerListener>>,
}

impl BatchState {
    fn delivered(&self) -> usize {
        self.results.iter().take_while(|r| r.is_some()).count()
    }

    fn deliver(&mut self, index: usize, result: RunResult) {
        for listener in &self.listeners {
            listener.on_result(index, &self.requests[index], &result);
        }
        self.results[index] = Some(result);
    }

    /// Mark every request without a result as cancelled.
    fn cancel_remaining(&mut self) {
        for index in self.delivered()..self.results.len() {
            self.deliver(index, RunResult::Cancelled);
        }
    }
}

struct Shared {
    state: Mutex<BatchState>,
    cond: Condvar,
    child: Mutex<Option<Child>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one batch of snippet requests in a fresh worker process.
pub struct ProcessRunner {
    worker: WorkerConfig,
    classpath: Vec<PathBuf>,
    pending: Mutex<Vec<RunRequest>>,
    shared: Arc<Shared>,
    problems: Arc<dyn ProblemsSink>,
    messenger: Arc<dyn Messenger>,
    batch_id: Uuid,
}

impl ProcessRunner {
    /// Create a runner for a project classpath.
    pub fn new(worker: WorkerConfig, classpath: Vec<PathBuf>) -> Self {
        let collaborators = Collaborators::default();
        Self {
            worker,
            classpath,
            pending: Mutex::new(Vec::new()),
            shared: Arc::new(Shared {
                state: Mutex::new(BatchState {
                    status: BatchStatus::Pending,
                    requests: Arc::new(Vec::new()),
                    results: Vec::new(),
                    launch_failure: None,
                    crash: None,
                    cancel_requested: false,
                    stderr: String::new(),
                    exit_code: None,
                    listeners: Vec::new(),
                }),
                cond: Condvar::new(),
                child: Mutex::new(None),
            }),
            problems: collaborators.problems,
            messenger: collaborators.messenger,
            batch_id: Uuid::new_v4(),
        }
    }

    /// Report stderr lines and crash problems to these collaborators.
    pub fn with_collaborators(mut self, collaborators: &Collaborators) -> Self {
        self.problems = collaborators.problems.clone();
        self.messenger = collaborators.messenger.clone();
        self
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Append a request. Fails once the runner has started.
    pub fn queue(&self, request: RunRequest) -> Result<usize> {
        let state = lock(&self.shared.state);
        if state.status != BatchStatus::Pending {
            return Err(Error::IllegalState(format!(
                "cannot queue {:?}: runner already {:?}",
                request.label(),
                state.status
            )));
        }
        let mut pending = lock(&self.pending);
        pending.push(request);
        Ok(pending.len() - 1)
    }

    /// Number of requests in this batch.
    pub fn len(&self) -> usize {
        let state = lock(&self.shared.state);
        if state.status == BatchStatus::Pending {
            lock(&self.pending).len()
        } else {
            state.requests.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a listener. Results already delivered are replayed to it
    /// first, so every listener sees the complete ordered sequence.
    pub fn add_listener(&self, listener: Arc<dyn RunnerListener>) {
        let mut state = lock(&self.shared.state);
        for (index, result) in state.results.iter().enumerate() {
            if let Some(result) = result {
                listener.on_result(index, &state.requests[index], result);
            }
        }
        match state.status {
            BatchStatus::LaunchFailed => {
                if let Some(failure) = &state.launch_failure {
                    listener.on_launch_failed(failure);
                }
                listener.on_complete();
            }
            BatchStatus::Cancelled => listener.on_cancelled(),
            BatchStatus::Completed | BatchStatus::Crashed => listener.on_complete(),
            BatchStatus::Pending | BatchStatus::Running => {}
        }
        state.listeners.push(listener);
    }

    /// Spawn the worker and start the batch.
    ///
    /// With `background == false` this blocks until the batch finishes.
    /// Launch failures are not errors of this call: they finish the batch
    /// with [`BatchStatus::LaunchFailed`] and a single batch-wide failure.
    pub fn run(&self, label: &str, background: bool) -> Result<()> {
        let requests = {
            let mut state = lock(&self.shared.state);
            if state.status != BatchStatus::Pending {
                return Err(Error::IllegalState(format!(
                    "runner already {:?}; create a new runner for another batch",
                    state.status
                )));
            }
            let requests = Arc::new(std::mem::take(&mut *lock(&self.pending)));
            state.results = vec![None; requests.len()];
            state.requests = requests.clone();
            state.status = BatchStatus::Running;
            requests
        };

        tracing::debug!(
            batch = %self.batch_id,
            "{}: launching worker for {} request(s)",
            label,
            requests.len()
        );

        if let Err(problem) = self.launch(label, requests) {
            self.finish_launch_failure(problem);
        }

        if !background {
            self.wait_for()?;
        }
        Ok(())
    }

    fn launch(&self, label: &str, requests: Arc<Vec<RunRequest>>) -> std::result::Result<(), CodeProblem> {
        let command_line = self
            .worker
            .command_line(&self.classpath)
            .map_err(|e| CodeProblem::generic(format!("{}: {}", label, e)))?;

        let mut child = command_line
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CodeProblem::generic(format!(
                    "{}: failed to spawn worker process '{}': {}",
                    label,
                    command_line.program.display(),
                    e
                ))
            })?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        *lock(&self.shared.child) = Some(child);

        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            self.reap();
            return Err(CodeProblem::generic("failed to open worker pipes"));
        };

        let spawned = self.spawn_io_threads(requests, stdin, stdout, stderr);
        if let Err(e) = spawned {
            self.reap();
            return Err(CodeProblem::generic(format!("failed to start I/O threads: {}", e)));
        }

        // A cancel that raced the spawn found no child to kill.
        if lock(&self.shared.state).cancel_requested {
            self.kill();
        }
        Ok(())
    }

    fn spawn_io_threads(
        &self,
        requests: Arc<Vec<RunRequest>>,
        stdin: ChildStdin,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> std::io::Result<()> {
        let id = self.batch_id.simple().to_string();
        let short = &id[..8];

        let writer_requests = requests.clone();
        thread::Builder::new()
            .name(format!("bindscope-stdin-{}", short))
            .spawn(move || write_requests(stdin, &writer_requests))?;

        let stderr_shared = self.shared.clone();
        let messenger = self.messenger.clone();
        let stderr_thread = thread::Builder::new()
            .name(format!("bindscope-stderr-{}", short))
            .spawn(move || drain_stderr(stderr, &stderr_shared, messenger.as_ref()))?;

        let shared = self.shared.clone();
        let problems = self.problems.clone();
        let batch_id = self.batch_id;
        thread::Builder::new()
            .name(format!("bindscope-stdout-{}", short))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                let outcome = read_results(&mut reader, &shared, requests.len());
                finish(&shared, outcome, stderr_thread, problems.as_ref(), batch_id);
            })?;

        Ok(())
    }

    fn finish_launch_failure(&self, problem: CodeProblem) {
        tracing::warn!(batch = %self.batch_id, "{}", problem);
        self.problems.push(std::slice::from_ref(&problem));
        let result = RunResult::failure(problem);

        let mut state = lock(&self.shared.state);
        for listener in &state.listeners {
            listener.on_launch_failed(&result);
            listener.on_complete();
        }
        state.launch_failure = Some(result);
        state.status = BatchStatus::LaunchFailed;
        self.shared.cond.notify_all();
    }

    /// Block until the batch finishes.
    pub fn wait_for(&self) -> Result<BatchStatus> {
        let mut state = lock(&self.shared.state);
        if state.status == BatchStatus::Pending {
            return Err(Error::IllegalState("runner has not been started".to_string()));
        }
        while !state.status.is_finished() {
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(state.status)
    }

    /// Block until request `index` has a result.
    pub fn wait_for_result(&self, index: usize) -> Result<RunResult> {
        let mut state = lock(&self.shared.state);
        loop {
            if state.status == BatchStatus::Pending {
                return Err(Error::IllegalState("runner has not been started".to_string()));
            }
            if index >= state.results.len() {
                return Err(Error::IllegalState(format!(
                    "no request at index {} (batch has {})",
                    index,
                    state.results.len()
                )));
            }
            if let Some(result) = &state.results[index] {
                return Ok(result.clone());
            }
            if let Some(failure) = &state.launch_failure {
                return Ok(failure.clone());
            }
            if state.status.is_finished() {
                return Ok(RunResult::Cancelled);
            }
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Request cancellation. Kills the worker if it is still running; every
    /// request without a result becomes `Cancelled`.
    pub fn cancel(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.status.is_finished() || state.cancel_requested {
                return;
            }
            state.cancel_requested = true;

            if state.status == BatchStatus::Pending {
                let requests = Arc::new(std::mem::take(&mut *lock(&self.pending)));
                state.results = vec![None; requests.len()];
                state.requests = requests;
                state.cancel_remaining();
                state.status = BatchStatus::Cancelled;
                for listener in &state.listeners {
                    listener.on_cancelled();
                }
                self.shared.cond.notify_all();
                return;
            }
        }

        tracing::debug!(batch = %self.batch_id, "cancelling worker");
        self.kill();
    }

    fn kill(&self) {
        if let Some(child) = lock(&self.shared.child).as_mut()
            && let Err(e) = child.kill()
        {
            // InvalidInput means the process already exited.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker: {}", e);
            }
        }
    }

    /// Kill and wait for a worker no I/O thread is attached to.
    fn reap(&self) {
        if let Some(mut child) = lock(&self.shared.child).take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.shared.state).cancel_requested
    }

    pub fn status(&self) -> BatchStatus {
        lock(&self.shared.state).status
    }

    /// Results delivered so far, in request order.
    pub fn results(&self) -> Vec<RunResult> {
        lock(&self.shared.state)
            .results
            .iter()
            .map_while(|r| r.clone())
            .collect()
    }

    /// The batch-wide failure, if the worker could not be launched.
    pub fn launch_failure(&self) -> Option<RunResult> {
        lock(&self.shared.state).launch_failure.clone()
    }

    /// Diagnostic describing a worker crash, if one happened.
    pub fn crash(&self) -> Option<CodeProblem> {
        lock(&self.shared.state).crash.clone()
    }

    /// Everything the worker wrote to stderr.
    pub fn stderr(&self) -> String {
        lock(&self.shared.state).stderr.clone()
    }

    pub fn exit_code(&self) -> Option<i32> {
        lock(&self.shared.state).exit_code
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        // Never leave a worker behind.
        if !self.status().is_finished() {
            self.kill();
        }
    }
}

fn write_requests(stdin: ChildStdin, requests: &[RunRequest]) {
    let mut writer = BufWriter::new(stdin);
    for request in requests {
        if let Err(e) = write_message(&mut writer, &request.to_command()) {
            // The worker is gone; the stdout thread reports why.
            tracing::debug!("Stopped writing requests: {}", e);
            return;
        }
    }
    let _ = write_message(&mut writer, &WorkerCommand::Shutdown);
}

fn drain_stderr(stderr: ChildStderr, shared: &Shared, messenger: &dyn Messenger) {
    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        messenger.message(&line);
        let mut state = lock(&shared.state);
        state.stderr.push_str(&line);
        state.stderr.push('\n');
    }
}

/// How the stdout stream ended.
enum StreamEnd {
    /// Every request got a result.
    Complete,
    /// The worker refused to start.
    LaunchError(String),
    /// The stream ended before the worker said it was ready.
    NoHandshake,
    /// The stream ended before every result arrived.
    Early,
    /// A result frame was cut off; that request already holds the failure.
    Truncated,
    /// Reading stopped because of a cancellation.
    Cancelled,
}

fn read_results<R: Read>(reader: &mut R, shared: &Shared, count: usize) -> StreamEnd {
    match read_frame(reader) {
        Ok(Frame::Message(bytes)) => match decode_message::<WorkerResponse>(&bytes) {
            Ok(WorkerResponse::Ready) => {}
            Ok(WorkerResponse::LaunchError { message }) => return StreamEnd::LaunchError(message),
            Ok(other) => {
                return StreamEnd::LaunchError(format!("unexpected handshake {:?}", other));
            }
            Err(e) => return StreamEnd::LaunchError(e.to_string()),
        },
        Ok(_) | Err(_) if lock(&shared.state).cancel_requested => return StreamEnd::Cancelled,
        Ok(_) | Err(_) => return StreamEnd::NoHandshake,
    }

    for index in 0..count {
        let frame = read_frame(reader);

        let mut state = lock(&shared.state);
        if state.cancel_requested {
            return StreamEnd::Cancelled;
        }

        let result = match frame {
            Ok(Frame::Message(bytes)) => match decode_message::<WorkerResponse>(&bytes) {
                Ok(WorkerResponse::Result(outcome)) => outcome.into(),
                Ok(other) => RunResult::failure(CodeProblem::transport(
                    StreamTag::Stdout,
                    format!("expected a result frame, got {:?}", other),
                )),
                Err(e) => RunResult::failure(CodeProblem::transport(StreamTag::Stdout, e.to_string())),
            },
            Ok(Frame::Truncated { expected, received }) => {
                let result = RunResult::failure(truncation_problem(&state.stderr, expected, received));
                state.deliver(index, result);
                shared.cond.notify_all();
                return StreamEnd::Truncated;
            }
            Ok(Frame::Eof) | Err(_) => return StreamEnd::Early,
        };

        state.deliver(index, result);
        shared.cond.notify_all();
    }

    StreamEnd::Complete
}

fn truncation_problem(stderr: &str, expected: usize, received: usize) -> CodeProblem {
    if stderr.trim().is_empty() {
        CodeProblem::transport(
            StreamTag::Stdout,
            format!(
                "result stream truncated: expected {} bytes, received {}",
                expected, received
            ),
        )
    } else {
        CodeProblem::transport(StreamTag::Stderr, stderr.trim_end().to_string())
    }
}

fn finish(
    shared: &Shared,
    end: StreamEnd,
    stderr_thread: JoinHandle<()>,
    problems: &dyn ProblemsSink,
    batch_id: Uuid,
) {
    // Kill before waiting when the worker refused to start, so nothing is left running.
    let child = lock(&shared.child).take();
    let exit_code = child.and_then(|mut child| {
        if matches!(end, StreamEnd::LaunchError(_)) {
            let _ = child.kill();
        }
        match child.wait() {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!("Failed to wait for worker: {}", e);
                None
            }
        }
    });
    let _ = stderr_thread.join();

    let mut state = lock(&shared.state);
    state.exit_code = exit_code;
    let mut pushed = Vec::new();
    let mut stderr_carried = false;

    match end {
        _ if state.cancel_requested => {
            state.cancel_remaining();
            state.status = BatchStatus::Cancelled;
            for listener in &state.listeners {
                listener.on_cancelled();
            }
            tracing::debug!(batch = %batch_id, "worker batch cancelled");
        }
        StreamEnd::Complete => {
            if exit_code != Some(0) {
                tracing::warn!(batch = %batch_id, "worker exited with {:?} after completing its batch", exit_code);
            }
            state.status = BatchStatus::Completed;
            for listener in &state.listeners {
                listener.on_complete();
            }
        }
        StreamEnd::LaunchError(_) | StreamEnd::NoHandshake => {
            let message = match end {
                StreamEnd::LaunchError(message) => message,
                _ if state.stderr.trim().is_empty() => {
                    format!("worker exited with {:?} before it was ready", exit_code)
                }
                _ => {
                    stderr_carried = true;
                    state.stderr.trim_end().to_string()
                }
            };
            let problem = CodeProblem::generic(format!("worker failed to start: {}", message));
            tracing::warn!(batch = %batch_id, "{}", problem);
            pushed.push(problem.clone());
            let result = RunResult::failure(problem);
            for listener in &state.listeners {
                listener.on_launch_failed(&result);
                listener.on_complete();
            }
            state.launch_failure = Some(result);
            state.status = BatchStatus::LaunchFailed;
        }
        StreamEnd::Early | StreamEnd::Truncated | StreamEnd::Cancelled => {
            let delivered = state.delivered();
            let total = state.results.len();
            let problem = crash_problem(&state.stderr, exit_code, delivered, total);
            tracing::warn!(batch = %batch_id, "{}", problem);
            stderr_carried = true;
            pushed.push(problem.clone());

            // The request the worker died on fails; the ones it never reached are cancelled.
            if !matches!(end, StreamEnd::Truncated) && delivered < total {
                state.deliver(delivered, RunResult::failure(problem.clone()));
            }
            state.cancel_remaining();
            state.crash = Some(problem);
            state.status = BatchStatus::Crashed;
            for listener in &state.listeners {
                listener.on_complete();
            }
        }
    }

    if !stderr_carried && !state.stderr.trim().is_empty() {
        pushed.push(CodeProblem::transport(
            StreamTag::Stderr,
            state.stderr.trim_end().to_string(),
        ));
    }
    if !pushed.is_empty() {
        problems.push(&pushed);
    }

    shared.cond.notify_all();
}

fn crash_problem(stderr: &str, exit_code: Option<i32>, delivered: usize, total: usize) -> CodeProblem {
    let status = match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    };
    let summary = format!(
        "worker terminated by {} after {} of {} results",
        status, delivered, total
    );

    if stderr.trim().is_empty() {
        CodeProblem::transport(StreamTag::Stdout, summary)
    } else {
        CodeProblem::transport(
            StreamTag::Stderr,
            format!("{}:\n{}", summary, stderr.trim_end()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::ipc::{SnippetOutcome, SnippetPayload};
    use crate::sink::ChannelProblemsSink;

    #[derive(Default)]
    struct Recorder {
        results: Mutex<Vec<(usize, RunResult)>>,
        complete: AtomicUsize,
        cancelled: AtomicUsize,
        launch_failed: AtomicUsize,
    }

    impl RunnerListener for Recorder {
        fn on_result(&self, index: usize, _request: &RunRequest, result: &RunResult) {
            lock(&self.results).push((index, result.clone()));
        }

        fn on_complete(&self) {
            self.complete.fetch_add(1, Ordering::SeqCst);
        }

        fn on_cancelled(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }

        fn on_launch_failed(&self, _result: &RunResult) {
            self.launch_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn missing_worker() -> WorkerConfig {
        WorkerConfig::with_executable("/nonexistent/bindscope-worker")
    }

    fn shared_with(count: usize) -> Shared {
        Shared {
            state: Mutex::new(BatchState {
                status: BatchStatus::Running,
                requests: Arc::new(
                    (0..count)
                        .map(|i| RunRequest::new(format!("r{}", i), "Echo"))
                        .collect(),
                ),
                results: vec![None; count],
                launch_failure: None,
                crash: None,
                cancel_requested: false,
                stderr: String::new(),
                exit_code: None,
                listeners: Vec::new(),
            }),
            cond: Condvar::new(),
            child: Mutex::new(None),
        }
    }

    fn text(line: &str) -> WorkerResponse {
        WorkerResponse::Result(SnippetOutcome::Success(SnippetPayload::Text(vec![
            line.to_string(),
        ])))
    }

    #[test]
    fn test_queue_after_run_fails() {
        if std::env::var(crate::config::WORKER_PATH_ENV).is_ok() {
            return;
        }
        let runner = ProcessRunner::new(missing_worker(), Vec::new());
        runner.queue(RunRequest::new("a", "Echo")).unwrap();
        runner.run("test", true).unwrap();

        let err = runner.queue(RunRequest::new("b", "Echo")).unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
        assert!(matches!(runner.run("again", true), Err(Error::IllegalState(_))));
    }

    #[test]
    fn test_launch_failure_is_single_batch_failure() {
        if std::env::var(crate::config::WORKER_PATH_ENV).is_ok() {
            return;
        }
        let runner = ProcessRunner::new(missing_worker(), Vec::new())
            .with_collaborators(&Collaborators::silent());
        let recorder = Arc::new(Recorder::default());
        runner.add_listener(recorder.clone());
        runner.queue(RunRequest::new("a", "Echo")).unwrap();
        runner.queue(RunRequest::new("b", "Echo")).unwrap();

        runner.run("test", false).unwrap();

        assert_eq!(runner.status(), BatchStatus::LaunchFailed);
        assert!(runner.results().is_empty());
        assert!(runner.launch_failure().unwrap().is_failure());
        assert!(runner.wait_for_result(1).unwrap().is_failure());
        assert_eq!(recorder.launch_failed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.complete.load(Ordering::SeqCst), 1);
        assert!(lock(&recorder.results).is_empty());
    }

    #[test]
    fn test_wait_before_run_is_illegal() {
        let runner = ProcessRunner::new(missing_worker(), Vec::new());
        assert!(matches!(runner.wait_for(), Err(Error::IllegalState(_))));
    }

    #[test]
    fn test_cancel_before_run() {
        let runner = ProcessRunner::new(missing_worker(), Vec::new());
        let recorder = Arc::new(Recorder::default());
        runner.add_listener(recorder.clone());
        runner.queue(RunRequest::new("a", "Echo")).unwrap();
        runner.queue(RunRequest::new("b", "Echo")).unwrap();

        runner.cancel();

        assert_eq!(runner.status(), BatchStatus::Cancelled);
        assert_eq!(runner.results(), vec![RunResult::Cancelled, RunResult::Cancelled]);
        assert_eq!(recorder.cancelled.load(Ordering::SeqCst), 1);
        assert!(runner.queue(RunRequest::new("c", "Echo")).is_err());
    }

    #[test]
    fn test_read_results_in_order() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerResponse::Ready).unwrap();
        write_message(&mut buf, &text("first")).unwrap();
        write_message(&mut buf, &text("second")).unwrap();

        let shared = shared_with(2);
        let end = read_results(&mut Cursor::new(buf), &shared, 2);

        assert!(matches!(end, StreamEnd::Complete));
        let state = lock(&shared.state);
        assert_eq!(state.delivered(), 2);
        match &state.results[1] {
            Some(RunResult::Success(SnippetPayload::Text(lines))) => assert_eq!(lines, &["second"]),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_launch_error_handshake() {
        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &WorkerResponse::LaunchError {
                message: "classpath entry missing".to_string(),
            },
        )
        .unwrap();

        let shared = shared_with(1);
        match read_results(&mut Cursor::new(buf), &shared, 1) {
            StreamEnd::LaunchError(message) => assert!(message.contains("classpath")),
            _ => panic!("expected launch error"),
        }
    }

    #[test]
    fn test_eof_before_handshake() {
        let shared = shared_with(2);
        let end = read_results(&mut Cursor::new(Vec::new()), &shared, 2);
        assert!(matches!(end, StreamEnd::NoHandshake));
        assert_eq!(lock(&shared.state).delivered(), 0);
    }

    #[test]
    fn test_truncated_result_fails_that_request() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerResponse::Ready).unwrap();
        write_message(&mut buf, &text("first")).unwrap();
        write_message(&mut buf, &text("second")).unwrap();
        buf.truncate(buf.len() - 3);

        let shared = shared_with(3);
        let end = read_results(&mut Cursor::new(buf), &shared, 3);

        assert!(matches!(end, StreamEnd::Truncated));
        let state = lock(&shared.state);
        assert!(state.results[0].as_ref().unwrap().is_success());
        let failure = state.results[1].as_ref().unwrap();
        assert_eq!(failure.problems()[0].stream, Some(StreamTag::Stdout));
        assert!(state.results[2].is_none());
    }

    #[test]
    fn test_undecodable_frame_fails_only_that_request() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerResponse::Ready).unwrap();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&[0xff, 0xff, 0xff]);
        write_message(&mut buf, &text("after")).unwrap();

        let shared = shared_with(2);
        let end = read_results(&mut Cursor::new(buf), &shared, 2);

        assert!(matches!(end, StreamEnd::Complete));
        let state = lock(&shared.state);
        assert!(state.results[0].as_ref().unwrap().is_failure());
        assert!(state.results[1].as_ref().unwrap().is_success());
    }

    fn finish_with(shared: &Shared, end: StreamEnd) -> Vec<Vec<CodeProblem>> {
        let (sink, rx) = ChannelProblemsSink::bounded(4);
        finish(shared, end, thread::spawn(|| {}), &sink, Uuid::new_v4());
        rx.try_iter().collect()
    }

    #[test]
    fn test_crash_fails_the_running_request() {
        let shared = shared_with(3);
        lock(&shared.state).deliver(0, RunResult::Success(SnippetPayload::Text(Vec::new())));

        let pushed = finish_with(&shared, StreamEnd::Early);

        let state = lock(&shared.state);
        assert_eq!(state.status, BatchStatus::Crashed);
        let failure = state.results[1].as_ref().unwrap();
        assert!(failure.problems()[0].message.contains("after 1 of 3"));
        assert!(state.results[2].as_ref().unwrap().is_cancelled());
        assert_eq!(pushed, vec![vec![state.crash.clone().unwrap()]]);
    }

    #[test]
    fn test_truncation_cancels_the_rest() {
        let shared = shared_with(3);
        {
            let mut state = lock(&shared.state);
            state.stderr.push_str("out of memory\n");
            state.deliver(0, RunResult::Success(SnippetPayload::Text(Vec::new())));
            let problem = truncation_problem(&state.stderr, 64, 3);
            state.deliver(1, RunResult::failure(problem));
        }

        let pushed = finish_with(&shared, StreamEnd::Truncated);

        let state = lock(&shared.state);
        assert!(state.results[1].as_ref().unwrap().is_failure());
        assert!(state.results[2].as_ref().unwrap().is_cancelled());
        // The crash problem already carries stderr.
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].len(), 1);
        assert!(pushed[0][0].message.contains("out of memory"));
    }

    #[test]
    fn test_stderr_forwarded_after_completed_batch() {
        let shared = shared_with(0);
        lock(&shared.state).stderr.push_str("warning: slow module\n");

        let pushed = finish_with(&shared, StreamEnd::Complete);

        assert_eq!(lock(&shared.state).status, BatchStatus::Completed);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0][0].stream, Some(StreamTag::Stderr));
        assert_eq!(pushed[0][0].message, "warning: slow module");
    }

    #[test]
    fn test_quiet_batch_pushes_nothing() {
        let shared = shared_with(0);
        assert!(finish_with(&shared, StreamEnd::Complete).is_empty());
    }

    #[test]
    fn test_crash_problem_prefers_stderr() {
        let problem = crash_problem("panic at module load\n", Some(3), 1, 4);
        assert_eq!(problem.stream, Some(StreamTag::Stderr));
        assert!(problem.message.contains("exit code 3 after 1 of 4"));
        assert!(problem.message.contains("panic at module load"));

        let problem = crash_problem("", None, 0, 2);
        assert_eq!(problem.stream, Some(StreamTag::Stdout));
    }

    #[test]
    fn test_cancel_remaining_fills_in_order() {
        let shared = shared_with(3);
        let recorder = Arc::new(Recorder::default());
        let mut state = lock(&shared.state);
        state.listeners.push(recorder.clone());
        state.deliver(0, RunResult::Success(SnippetPayload::Text(Vec::new())));
        state.cancel_remaining();

        let seen = lock(&recorder.results);
        let indices: Vec<usize> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(seen[1].1.is_cancelled() && seen[2].1.is_cancelled());
    }
}
