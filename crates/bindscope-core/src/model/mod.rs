//! In-memory model of modules, module contexts and their bindings.

mod context;
mod location;
mod module;

pub use context::{ModuleContextRepresentation, default_context_name};
pub use location::{BindingCodeLocation, BindingKey};
pub use module::{ModuleRepresentation, Validity};
