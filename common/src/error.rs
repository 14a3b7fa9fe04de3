//! Error types shared across the engine.

use thiserror::Error;

/// Failures raised by the staging store.
///
/// Workers treat every variant the same way: log it, abandon the task and go
/// back to fetching. The coordinator's lease timeout takes care of the retry.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The logical name is not in the file index, or the indexed file is
    /// gone from disk.
    #[error("file not known to the store: {0}")]
    NotFound(String),

    /// Any other filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A task or job configuration failed validation.
///
/// Raised at component boundaries and fatal to the caller: a worker handed a
/// malformed task record gives up instead of executing it.
#[derive(Debug, Error)]
#[error("validation failed: {}", errors.join(", "))]
pub struct ValidationError {
    errors: Vec<String>,
}

impl ValidationError {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }

    /// The individual rule failures, in evaluation order.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}
