//! Per-project module manager.
//!
//! - `module_manager` - `ModuleManager`, caching and invalidation
//! - `report` - `UpdateReport` published after every update

mod module_manager;
mod report;

pub use module_manager::{CancelHandle, ModuleManager};
pub use report::{ContextOutcome, ContextStatus, ModuleOutcome, UpdateReport};
