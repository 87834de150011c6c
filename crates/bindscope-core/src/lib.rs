//! Core engine for bindscope: out-of-process resolution of dependency
//! injection bindings.
//!
//! This crate provides:
//! - The snippet protocol spoken with worker processes
//! - A process runner and a sequential progress controller
//! - Module and module context representations
//! - The per-project module manager with caching and invalidation
//! - Source discovery, configuration and outbound sinks

pub mod app;
pub mod config;
pub mod error;
pub mod execute;
pub mod ipc;
pub mod manager;
pub mod model;
pub mod paths;
pub mod problem;
pub mod project;
pub mod sink;
pub mod source;

pub use app::AppContext;
pub use config::{ProjectConfig, WorkerConfig};
pub use error::{Error, Result};
pub use execute::{
    AbortHandle, BatchStatus, ProcessRunner, ProgressController, ProgressObserver, ProgressStep,
    RunRequest, RunResult, RunnerListener,
};
pub use manager::{CancelHandle, ContextOutcome, ContextStatus, ModuleManager, UpdateReport};
pub use model::{
    BindingCodeLocation, BindingKey, ModuleContextRepresentation, ModuleRepresentation, Validity,
};
pub use paths::ProjectDirs;
pub use problem::{CodeProblem, ProblemKind, StreamTag};
pub use project::ProjectHandle;
pub use sink::{Collaborators, Messenger, ProblemsSink, ResultsSink};
pub use source::{ContextDefinition, DiscoveredModule, FileSource, Source};
