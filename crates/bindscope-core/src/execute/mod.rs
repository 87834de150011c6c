//! Out-of-process snippet execution.
//!
//! # Architecture
//!
//! ```text
//! ModuleManager::update
//!     │
//!     ├── ProcessRunner (one worker process per batch)
//!     │       ├── queue(RunRequest)...
//!     │       └── run() → Run frames on stdin, Result frames on stdout
//!     │
//!     └── ProgressController (one execution thread)
//!             └── SnippetStep per request, in queue order
//!                     └── wait_for_result(i) → channel → update thread
//! ```
//!
//! Cancellation flows the other way: `ProgressController::cancel` cancels
//! the running step, which cancels the runner, which kills the worker.
//! Every request without a result becomes `Cancelled`.
//!
//! # Module Structure
//!
//! - `progress` - Run queue, progress observers and `AbortHandle`
//! - `request` - `RunRequest` and `RunResult`
//! - `runner` - `ProcessRunner`, one worker process per batch
//! - `step` - `SnippetStep`, a progress step waiting on a runner result

mod progress;
mod request;
mod runner;
mod step;

pub use progress::{
    AbortHandle, ProgressController, ProgressObserver, ProgressOutcome, ProgressStep, StepState,
    StepStatus, TracingObserver,
};
pub use request::{RunRequest, RunResult};
pub use runner::{BatchStatus, ProcessRunner, RunnerListener};
pub use step::SnippetStep;
