use thiserror::Error;

/// Errors that can occur in trellis-core.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// No split partition could be loaded from the given paths.
    #[error("No triple partitions found under {0}")]
    NoPartitions(String),
    /// Column lengths disagree.
    #[error("Column length mismatch: {0}")]
    ColumnMismatch(String),
}

/// Result type alias for trellis-core.
pub type Result<T> = std::result::Result<T, Error>;
