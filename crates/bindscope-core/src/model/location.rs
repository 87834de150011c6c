//! Binding keys and the code locations they resolve to.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::problem::CodeProblem;

/// A requested key, optionally qualified by an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize)]
pub struct BindingKey {
    pub key: String,
    pub annotation: Option<String>,
}

impl BindingKey {
    pub fn new(key: impl Into<String>, annotation: Option<&str>) -> Self {
        Self {
            key: key.into(),
            annotation: annotation.map(str::to_string),
        }
    }

    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            annotation: None,
        }
    }

    /// Parse `Key` or `Key@annotation`.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('@') {
            Some((key, annotation)) if !annotation.is_empty() => {
                Self::new(key.trim(), Some(annotation.trim()))
            }
            Some((key, _)) => Self::plain(key.trim()),
            None => Self::plain(spec.trim()),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.annotation {
            Some(annotation) => write!(f, "{}@{}", self.key, annotation),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Where a key is bound in a module context.
///
/// Absence is explicit: a key the worker was asked about but found no
/// binding for is reported as [`BindingCodeLocation::NoBinding`].
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum BindingCodeLocation {
    Bound {
        requested_key: String,
        annotation: Option<String>,
        bound_to: String,
        source_file: Option<String>,
        source_line: Option<u32>,
        problems: Vec<CodeProblem>,
    },
    NoBinding {
        requested_key: String,
        annotation: Option<String>,
    },
}

impl BindingCodeLocation {
    pub fn requested_key(&self) -> &str {
        match self {
            Self::Bound { requested_key, .. } | Self::NoBinding { requested_key, .. } => {
                requested_key
            }
        }
    }

    pub fn annotation(&self) -> Option<&str> {
        match self {
            Self::Bound { annotation, .. } | Self::NoBinding { annotation, .. } => {
                annotation.as_deref()
            }
        }
    }

    pub fn key(&self) -> BindingKey {
        BindingKey::new(self.requested_key(), self.annotation())
    }

    /// Implementation the key is bound to, `None` for unbound keys.
    pub fn bind_to(&self) -> Option<&str> {
        match self {
            Self::Bound { bound_to, .. } => Some(bound_to),
            Self::NoBinding { .. } => None,
        }
    }

    pub fn source(&self) -> Option<(&str, Option<u32>)> {
        match self {
            Self::Bound {
                source_file: Some(file),
                source_line,
                ..
            } => Some((file, *source_line)),
            _ => None,
        }
    }

    pub fn problems(&self) -> &[CodeProblem] {
        match self {
            Self::Bound { problems, .. } => problems,
            Self::NoBinding { .. } => &[],
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }
}

impl fmt::Display for BindingCodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound { bound_to, .. } => {
                write!(f, "{} -> {}", self.key(), bound_to)?;
                if let Some((file, line)) = self.source() {
                    match line {
                        Some(line) => write!(f, " ({}:{})", file, line)?,
                        None => write!(f, " ({})", file)?,
                    }
                }
                Ok(())
            }
            Self::NoBinding { .. } => write!(f, "{} -> <no binding>", self.key()),
        }
    }
}
