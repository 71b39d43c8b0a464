use std::path::PathBuf;

use thiserror::Error;

/// Why the runtime artifact could not be brought up.
///
/// Cloneable because every caller waiting on the same load attempt
/// receives its own copy of the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("runtime artifact not found at {0}")]
    MissingArtifact(PathBuf),
    #[error("failed to read runtime artifact {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("invalid runtime manifest: {0}")]
    Manifest(String),
    #[error("failed to instantiate runtime: {0}")]
    Instantiate(String),
    #[error("runtime artifact does not export `{0}`")]
    MissingEntryPoint(String),
}

/// Failure of a single execution request, returned by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("runtime failed to load: {0}")]
    LoadFailed(LoadError),
    #[error("{0}")]
    RuntimeError(String),
    #[error("unexpected runtime failure: {0}")]
    UnexpectedFailure(String),
}

/// A call across the artifact boundary did not complete (trap, bad
/// pointer, missing memory).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("runtime fault: {0}")]
pub struct RuntimeFault(pub String);

impl RuntimeFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<wasmi::Error> for RuntimeFault {
    fn from(err: wasmi::Error) -> Self {
        Self(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("saved state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
