//! Module descriptors: the worker's view of a compiled binding module.
//!
//! ```json
//! {
//!   "source": "src/com/acme/ShopModule.java",
//!   "parameters": ["url"],
//!   "installs": ["com.acme.DbModule"],
//!   "bindings": [
//!     { "key": "Service", "annotation": "blue", "to": "BlueService", "line": 12 }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModuleDescriptor {
    /// Declared name. When set it must equal the name the module was requested by.
    pub name: Option<String>,
    /// Source file the bindings are declared in.
    pub source: Option<String>,
    /// Constructor parameter names. Instantiation needs one argument each.
    pub parameters: Vec<String>,
    /// When set, the constructor fails with this message.
    pub constructor_error: Option<String>,
    /// Modules installed by this one.
    pub installs: Vec<String>,
    pub bindings: Vec<BindingDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindingDecl {
    pub key: String,
    #[serde(default)]
    pub annotation: Option<String>,
    /// Target; an untargetted binding binds the key to itself.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

impl BindingDecl {
    pub fn target(&self) -> &str {
        self.to.as_deref().unwrap_or(&self.key)
    }

    /// Request and session scoped bindings only resolve inside a live request.
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self.scope.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("request" | "session")
        )
    }
}

impl ModuleDescriptor {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_descriptor() {
        let descriptor: ModuleDescriptor = serde_json::from_str("{}").unwrap();
        assert!(descriptor.bindings.is_empty());
        assert!(descriptor.parameters.is_empty());
    }

    #[test]
    fn test_binding_defaults() {
        let decl: BindingDecl = serde_json::from_str(r#"{"key": "Clock"}"#).unwrap();
        assert_eq!(decl.target(), "Clock");
        assert!(!decl.is_request_scoped());

        let decl: BindingDecl =
            serde_json::from_str(r#"{"key": "Cart", "to": "SessionCart", "scope": "Session"}"#).unwrap();
        assert_eq!(decl.target(), "SessionCart");
        assert!(decl.is_request_scoped());
    }
}
