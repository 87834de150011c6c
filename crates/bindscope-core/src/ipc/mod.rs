//! Inter-process communication for bindscope worker processes.
//!
//! This module provides the protocol and argument layouts shared by the
//! runner and the worker binary.

mod args;
pub mod protocol;

pub use args::{ArgReader, ContextQuery, ModuleQuery, ModuleSpec};
pub use protocol::{
    ContextSnippetResult, Frame, ModuleSnippetResult, SnippetOutcome, SnippetPayload,
    WorkerCommand, WorkerResponse, decode_message, read_frame, read_message, write_message,
};
