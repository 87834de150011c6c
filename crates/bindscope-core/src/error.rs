//! Error types for bindscope-core.

use thiserror::Error;

/// Result type for bindscope-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bindscope-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation not allowed in the current lifecycle phase
    /// (e.g. queueing a request after the runner started).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A resolution batch is already in flight for this project.
    #[error("project {project} is busy with another resolution batch")]
    Busy { project: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IPC communication error with the worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// JSON error while reading configuration or descriptors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The worker process could not be started.
    #[error("failed to launch worker: {0}")]
    Launch(String),

    /// Could not locate the worker executable.
    #[error("worker executable not found: {0}")]
    WorkerNotFound(String),

    /// Snippet arguments did not match the expected layout.
    #[error("invalid snippet arguments: {0}")]
    InvalidArguments(String),

    /// Module context not found.
    #[error("module context not found: {0}")]
    ContextNotFound(String),
}

impl Error {
    /// Render the error together with a recovery hint, if one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Busy { .. } => Some("wait for the running update to finish or cancel it"),
            Error::WorkerNotFound(_) => Some(
                "set BINDSCOPE_WORKER_PATH or install bindscope-worker next to the bindscope binary",
            ),
            Error::Launch(_) => Some("check the worker executable, flags and classpath in .bindscope/project.json"),
            Error::Config(_) | Error::Json(_) => Some("fix .bindscope/project.json and retry"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_hint() {
        let err = Error::Busy {
            project: "demo".to_string(),
        };
        let rendered = err.with_hint();
        assert!(rendered.starts_with("project demo is busy"));
        assert!(rendered.contains("hint:"));
    }

    #[test]
    fn test_no_hint() {
        let err = Error::Ipc("pipe closed".to_string());
        assert_eq!(err.with_hint(), "IPC error: pipe closed");
    }
}
