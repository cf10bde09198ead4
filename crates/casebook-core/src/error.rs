use thiserror::Error;

/// Top-level error type for the Casebook system.
///
/// Each variant wraps a subsystem-specific failure. Subsystem crates map
/// their internal errors into these variants so that the `?` operator works
/// seamlessly across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CasebookError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Content source error: {0}")]
    Source(String),

    #[error("Captioning error: {0}")]
    Caption(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    /// A stage precondition is missing (ledger or index not built yet).
    ///
    /// Callers must be able to distinguish "nothing built yet" from a
    /// broken run, so this is its own variant rather than a generic error.
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for CasebookError {
    fn from(err: toml::de::Error) -> Self {
        CasebookError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CasebookError {
    fn from(err: toml::ser::Error) -> Self {
        CasebookError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CasebookError {
    fn from(err: serde_json::Error) -> Self {
        CasebookError::Serialization(err.to_string())
    }
}

impl CasebookError {
    /// True when the error is the distinct "nothing built yet" condition.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, CasebookError::NotReady(_))
    }
}

/// A specialized `Result` type for Casebook operations.
pub type Result<T> = std::result::Result<T, CasebookError>;
